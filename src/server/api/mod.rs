mod artifacts;
mod branches;
mod elements;
mod orgs;
mod projects;
mod users;
mod webhooks;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::Duration;

use crate::auth::{RequireUser, TokenGenerator};
use crate::server::AppState;
use crate::server::dto::LoginResponse;
use crate::server::response::{ApiError, ApiResponse};

/// Largest accepted blob upload or compressed element import.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

pub fn api_router() -> Router<Arc<AppState>> {
    let project = "/orgs/{org}/projects/{project}";
    let branch = "/orgs/{org}/projects/{project}/branches/{branch}";

    Router::new()
        .route("/test", get(test))
        .route("/version", get(version))
        .route("/login", post(login))
        // Users
        .route("/users/whoami", get(users::whoami))
        .route(
            "/users",
            get(users::list_users)
                .post(users::create_users)
                .patch(users::update_users)
                .delete(users::delete_users),
        )
        .route(
            "/users/{username}",
            get(users::get_user)
                .post(users::create_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/{username}/password", patch(users::update_password))
        // Orgs
        .route(
            "/orgs",
            get(orgs::list_orgs)
                .post(orgs::create_orgs)
                .patch(orgs::update_orgs)
                .delete(orgs::delete_orgs),
        )
        .route(
            "/orgs/{org}",
            get(orgs::get_org)
                .post(orgs::create_org)
                .patch(orgs::update_org)
                .delete(orgs::delete_org),
        )
        // Projects
        .route("/projects", get(projects::list_all_projects))
        .route(
            "/orgs/{org}/projects",
            get(projects::list_projects)
                .post(projects::create_projects)
                .patch(projects::update_projects)
                .delete(projects::delete_projects),
        )
        .route(
            project,
            get(projects::get_project)
                .post(projects::create_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        // Branches
        .route(
            &format!("{project}/branches"),
            get(branches::list_branches)
                .post(branches::create_branches)
                .patch(branches::update_branches)
                .delete(branches::delete_branches),
        )
        .route(
            branch,
            get(branches::get_branch)
                .post(branches::create_branch)
                .patch(branches::update_branch)
                .delete(branches::delete_branch),
        )
        // Elements
        .route(
            &format!("{branch}/elements"),
            get(elements::list_elements)
                .post(elements::create_elements)
                .patch(elements::update_elements)
                .delete(elements::delete_elements)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            &format!("{branch}/elements/{{element}}"),
            get(elements::get_element)
                .post(elements::create_element)
                .patch(elements::update_element)
                .delete(elements::delete_element),
        )
        // Artifacts
        .route(
            &format!("{branch}/artifacts"),
            get(artifacts::list_artifacts)
                .post(artifacts::create_artifacts)
                .patch(artifacts::update_artifacts)
                .delete(artifacts::delete_artifacts),
        )
        .route(
            &format!("{branch}/artifacts/{{artifact}}"),
            get(artifacts::get_artifact)
                .post(artifacts::create_artifact)
                .patch(artifacts::update_artifact)
                .delete(artifacts::delete_artifact),
        )
        .route(
            &format!("{branch}/artifacts/{{artifact}}/blob"),
            get(artifacts::get_artifact_blob),
        )
        .route(
            &format!("{project}/artifacts/blob"),
            get(artifacts::get_blob)
                .post(artifacts::post_blob)
                .delete(artifacts::delete_blob)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(&format!("{project}/artifacts/list"), get(artifacts::list_blobs))
        // Webhooks
        .route(
            "/webhooks",
            get(webhooks::list_webhooks)
                .post(webhooks::create_webhooks)
                .patch(webhooks::update_webhooks)
                .delete(webhooks::delete_webhooks),
        )
        .route(
            "/webhooks/{id}",
            get(webhooks::get_webhook)
                .patch(webhooks::update_webhook)
                .delete(webhooks::delete_webhook),
        )
        .route("/webhooks/trigger/{encoded}", post(webhooks::trigger_webhook))
}

async fn test() -> StatusCode {
    StatusCode::OK
}

async fn version() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Issues a session token to an authenticated user.
async fn login(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let secs = state.config.auth.session_timeout_secs;
    let lifetime = if secs > 0 {
        Duration::try_seconds(secs)
    } else {
        None
    };
    let (token, raw) = TokenGenerator::new().issue(state.store.as_ref(), &user.username, lifetime)?;

    tracing::info!(user = %user.username, "issued session token");
    Ok(Json(ApiResponse::success(LoginResponse {
        token: raw,
        expires_at: token.expires_at,
    })))
}

/// `201 Created` with the standard envelope.
pub(super) fn created<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

pub(super) fn ok<T: serde::Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

/// Makes `filename` safe to embed in a `Content-Disposition` header.
pub(super) fn attachment(filename: &str) -> HeaderValue {
    let safe: String = filename
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    let safe = if safe.is_empty() { "blob".to_string() } else { safe };
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

pub(super) fn content_type_is(headers: &axum::http::HeaderMap, expected: &str) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(expected))
}
