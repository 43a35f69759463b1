use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};

use super::{created, ok};
use crate::auth::RequireUser;
use crate::controllers::projects as controller;
use crate::server::AppState;
use crate::server::dto::{ArchivedParam, ListParams, OneOrMany, ProjectRequest};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::Project;
use crate::validators::ensure_unchanged;

type Reply<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub async fn list_all_projects(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ArchivedParam>,
) -> Reply<Vec<Project>> {
    Ok(ok(controller::find_all_projects(&state, &user, params.archived)?))
}

pub async fn list_projects(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    Query(params): Query<ListParams>,
) -> Reply<Vec<Project>> {
    let ids = params.id_filter();
    Ok(ok(controller::find_projects(
        &state,
        &user,
        &org,
        ids.as_deref(),
        params.archived,
    )?))
}

pub async fn create_projects(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    Json(body): Json<OneOrMany<ProjectRequest>>,
) -> Result<Response, ApiError> {
    Ok(created(controller::create_projects(&state, &user, &org, body.into_vec())?))
}

pub async fn update_projects(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    Json(body): Json<OneOrMany<ProjectRequest>>,
) -> Reply<Vec<Project>> {
    Ok(ok(controller::update_projects(&state, &user, &org, body.into_vec())?))
}

pub async fn delete_projects(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path(org): Path<String>,
    Json(ids): Json<Vec<String>>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_projects(&state, &user, &org, &ids).await?))
}

pub async fn get_project(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Query(params): Query<ArchivedParam>,
) -> Reply<Project> {
    Ok(ok(controller::find_project(&state, &user, &org, &project, params.archived)?))
}

pub async fn create_project(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Json(mut input): Json<ProjectRequest>,
) -> Result<Response, ApiError> {
    ensure_unchanged("Project", "id", project.as_str(), input.id.as_deref())?;
    input.id = Some(project);
    let mut projects = controller::create_projects(&state, &user, &org, vec![input])?;
    Ok(created(projects.pop()))
}

pub async fn update_project(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Json(input): Json<ProjectRequest>,
) -> Reply<Project> {
    Ok(ok(controller::update_project(&state, &user, &org, &project, input)?))
}

pub async fn delete_project(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_projects(&state, &user, &org, &[project]).await?))
}
