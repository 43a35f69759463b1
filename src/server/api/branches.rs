use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};

use super::{created, ok};
use crate::auth::RequireUser;
use crate::controllers::branches as controller;
use crate::server::AppState;
use crate::server::dto::{ArchivedParam, BranchRequest, ListParams, OneOrMany};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::Branch;
use crate::validators::ensure_unchanged;

type Reply<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub async fn list_branches(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Query(params): Query<ListParams>,
) -> Reply<Vec<Branch>> {
    let ids = params.id_filter();
    Ok(ok(controller::find_branches(
        &state,
        &user,
        &org,
        &project,
        ids.as_deref(),
        params.archived,
    )?))
}

pub async fn create_branches(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Json(body): Json<OneOrMany<BranchRequest>>,
) -> Result<Response, ApiError> {
    Ok(created(controller::create_branches(
        &state,
        &user,
        &org,
        &project,
        body.into_vec(),
    )?))
}

pub async fn update_branches(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Json(body): Json<OneOrMany<BranchRequest>>,
) -> Reply<Vec<Branch>> {
    Ok(ok(controller::update_branches(
        &state,
        &user,
        &org,
        &project,
        body.into_vec(),
    )?))
}

pub async fn delete_branches(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Json(ids): Json<Vec<String>>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_branches(&state, &user, &org, &project, &ids)?))
}

pub async fn get_branch(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Query(params): Query<ArchivedParam>,
) -> Reply<Branch> {
    Ok(ok(controller::find_branch(
        &state,
        &user,
        &org,
        &project,
        &branch,
        params.archived,
    )?))
}

pub async fn create_branch(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Json(mut input): Json<BranchRequest>,
) -> Result<Response, ApiError> {
    ensure_unchanged("Branch", "id", branch.as_str(), input.id.as_deref())?;
    input.id = Some(branch);
    let mut branches = controller::create_branches(&state, &user, &org, &project, vec![input])?;
    Ok(created(branches.pop()))
}

pub async fn update_branch(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Json(input): Json<BranchRequest>,
) -> Reply<Branch> {
    Ok(ok(controller::update_branch(
        &state, &user, &org, &project, &branch, input,
    )?))
}

pub async fn delete_branch(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_branches(&state, &user, &org, &project, &[branch])?))
}
