use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::error::Error;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

/// API error that converts to a proper HTTP response
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Permission(e) => ApiError::forbidden(e.message),
            Error::Validation { .. } | Error::InvalidTokenFormat => {
                ApiError::bad_request(err.to_string())
            }
            Error::BadRequest(message) => ApiError::bad_request(message),
            Error::NotFound(_) => ApiError::not_found(err.to_string()),
            Error::AlreadyExists(_) => ApiError::conflict(err.to_string()),
            Error::Unauthorized => ApiError::unauthorized("Unauthorized"),
            other => {
                tracing::error!("Request failed: {other}");
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "data": null, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionError;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                Error::Permission(PermissionError::new("nope")),
                StatusCode::FORBIDDEN,
            ),
            (Error::validation("id", "bad"), StatusCode::BAD_REQUEST),
            (Error::BadRequest("bad".into()), StatusCode::BAD_REQUEST),
            (Error::not_found("Org [acme]"), StatusCode::NOT_FOUND),
            (Error::AlreadyExists("Org [acme]".into()), StatusCode::CONFLICT),
            (Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (Error::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = ApiError::from(Error::Storage("disk /secret/path full".into()));
        assert_eq!(err.message, "Internal server error");

        let err = ApiError::from(Error::Permission(PermissionError::new("no access")));
        assert_eq!(err.message, "no access");
    }
}
