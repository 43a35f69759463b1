use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};

use super::{created, ok};
use crate::auth::RequireUser;
use crate::controllers::users as controller;
use crate::server::AppState;
use crate::server::dto::{ArchivedParam, ListParams, OneOrMany, PasswordRequest, UserRequest};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::User;
use crate::validators::ensure_unchanged;

type Reply<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub async fn whoami(RequireUser(user): RequireUser) -> Json<ApiResponse<User>> {
    ok(controller::whoami(&user))
}

pub async fn list_users(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Reply<Vec<User>> {
    let ids = params.id_filter();
    Ok(ok(controller::find_users(&state, &user, ids.as_deref(), params.archived)?))
}

pub async fn create_users(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<OneOrMany<UserRequest>>,
) -> Result<Response, ApiError> {
    Ok(created(controller::create_users(&state, &user, body.into_vec())?))
}

pub async fn update_users(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<OneOrMany<UserRequest>>,
) -> Reply<Vec<User>> {
    Ok(ok(controller::update_users(&state, &user, body.into_vec())?))
}

pub async fn delete_users(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(usernames): Json<Vec<String>>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_users(&state, &user, &usernames)?))
}

pub async fn get_user(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Query(params): Query<ArchivedParam>,
) -> Reply<User> {
    Ok(ok(controller::find_user(&state, &user, &username, params.archived)?))
}

pub async fn create_user(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(mut input): Json<UserRequest>,
) -> Result<Response, ApiError> {
    ensure_unchanged("User", "username", username.as_str(), input.username.as_deref())?;
    input.username = Some(username);
    let mut users = controller::create_users(&state, &user, vec![input])?;
    Ok(created(users.pop()))
}

pub async fn update_user(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(input): Json<UserRequest>,
) -> Reply<User> {
    Ok(ok(controller::update_user(&state, &user, &username, input)?))
}

pub async fn delete_user(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_users(&state, &user, &[username])?))
}

pub async fn update_password(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(request): Json<PasswordRequest>,
) -> Reply<User> {
    Ok(ok(controller::update_password(&state, &user, &username, request)?))
}
