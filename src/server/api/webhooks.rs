use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use serde_json::Value;

use super::{created, ok};
use crate::auth::RequireUser;
use crate::controllers::webhooks as controller;
use crate::server::AppState;
use crate::server::dto::{ArchivedParam, ListParams, OneOrMany, WebhookRequest};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::Webhook;

type Reply<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub async fn list_webhooks(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Reply<Vec<Webhook>> {
    let ids = params.id_filter();
    Ok(ok(controller::find_webhooks(&state, &user, ids.as_deref(), params.archived)?))
}

pub async fn create_webhooks(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<OneOrMany<WebhookRequest>>,
) -> Result<Response, ApiError> {
    Ok(created(controller::create_webhooks(&state, &user, body.into_vec())?))
}

pub async fn update_webhooks(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<OneOrMany<WebhookRequest>>,
) -> Reply<Vec<Webhook>> {
    Ok(ok(controller::update_webhooks(&state, &user, body.into_vec())?))
}

pub async fn delete_webhooks(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(ids): Json<Vec<String>>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_webhooks(&state, &user, &ids)?))
}

pub async fn get_webhook(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ArchivedParam>,
) -> Reply<Webhook> {
    Ok(ok(controller::find_webhook(&state, &user, &id, params.archived)?))
}

pub async fn update_webhook(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(input): Json<WebhookRequest>,
) -> Reply<Webhook> {
    Ok(ok(controller::update_webhook(&state, &user, &id, input)?))
}

pub async fn delete_webhook(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_webhooks(&state, &user, &[id])?))
}

/// Unauthenticated: the token inside the body is the credential.
pub async fn trigger_webhook(
    State(state): State<Arc<AppState>>,
    Path(encoded): Path<String>,
    Json(body): Json<Value>,
) -> Reply<Webhook> {
    Ok(ok(controller::trigger_webhook(&state, &encoded, body)?))
}
