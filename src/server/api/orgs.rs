use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};

use super::{created, ok};
use crate::auth::RequireUser;
use crate::controllers::orgs as controller;
use crate::server::AppState;
use crate::server::dto::{ArchivedParam, ListParams, OneOrMany, OrgRequest};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::Org;
use crate::validators::ensure_unchanged;

type Reply<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub async fn list_orgs(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Reply<Vec<Org>> {
    let ids = params.id_filter();
    Ok(ok(controller::find_orgs(&state, &user, ids.as_deref(), params.archived)?))
}

pub async fn create_orgs(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<OneOrMany<OrgRequest>>,
) -> Result<Response, ApiError> {
    Ok(created(controller::create_orgs(&state, &user, body.into_vec())?))
}

pub async fn update_orgs(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<OneOrMany<OrgRequest>>,
) -> Reply<Vec<Org>> {
    Ok(ok(controller::update_orgs(&state, &user, body.into_vec())?))
}

pub async fn delete_orgs(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Json(ids): Json<Vec<String>>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_orgs(&state, &user, &ids).await?))
}

pub async fn get_org(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    Query(params): Query<ArchivedParam>,
) -> Reply<Org> {
    Ok(ok(controller::find_org(&state, &user, &org, params.archived)?))
}

pub async fn create_org(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    Json(mut input): Json<OrgRequest>,
) -> Result<Response, ApiError> {
    ensure_unchanged("Org", "id", org.as_str(), input.id.as_deref())?;
    input.id = Some(org);
    let mut orgs = controller::create_orgs(&state, &user, vec![input])?;
    Ok(created(orgs.pop()))
}

pub async fn update_org(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    Json(input): Json<OrgRequest>,
) -> Reply<Org> {
    Ok(ok(controller::update_org(&state, &user, &org, input)?))
}

pub async fn delete_org(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_orgs(&state, &user, &[org]).await?))
}
