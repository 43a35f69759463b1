use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::helpers::{AuthFailure, authenticate, extract_credentials};
use crate::server::AppState;
use crate::types::User;

/// Extractor that requires an authenticated, non-archived user.
pub struct RequireUser(pub User);

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidCredentials,
    TokenExpired,
    Archived,
    InternalError,
}

impl From<AuthFailure> for AuthError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::InvalidScheme => AuthError::InvalidScheme,
            AuthFailure::InvalidCredentials => AuthError::InvalidCredentials,
            AuthFailure::TokenExpired => AuthError::TokenExpired,
            AuthFailure::Archived => AuthError::Archived,
            AuthFailure::InternalError => AuthError::InternalError,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid username or password"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired"),
            AuthError::Archived => (StatusCode::FORBIDDEN, "User is archived"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                "WWW-Authenticate",
                HeaderValue::from_static("Basic realm=\"mbee\""),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let credentials = extract_credentials(auth_header)?.ok_or(AuthError::MissingAuth)?;
        let user = authenticate(state, &credentials)?;

        Ok(RequireUser(user))
    }
}
