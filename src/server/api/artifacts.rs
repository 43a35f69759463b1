use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

use super::{attachment, created, ok};
use crate::artifact::BlobReader;
use crate::auth::RequireUser;
use crate::controllers::artifacts as controller;
use crate::server::AppState;
use crate::server::dto::{ArchivedParam, ArtifactRequest, BlobParams, ListParams, OneOrMany};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::{Artifact, BlobInfo};
use crate::validators::ensure_unchanged;

type Reply<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn stream_blob(reader: BlobReader, size: u64, filename: &str) -> Response {
    let body = Body::from_stream(ReaderStream::new(reader));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .header(header::CONTENT_DISPOSITION, attachment(filename))
        .header("X-Content-Type-Options", "nosniff")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

pub async fn list_artifacts(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Query(params): Query<ListParams>,
) -> Reply<Vec<Artifact>> {
    let ids = params.id_filter();
    Ok(ok(controller::find_artifacts(
        &state,
        &user,
        &org,
        &project,
        &branch,
        ids.as_deref(),
        params.archived,
    )?))
}

pub async fn create_artifacts(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Json(body): Json<OneOrMany<ArtifactRequest>>,
) -> Result<Response, ApiError> {
    let artifacts =
        controller::create_artifacts(&state, &user, &org, &project, &branch, body.into_vec())
            .await?;
    Ok(created(artifacts))
}

pub async fn update_artifacts(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Json(body): Json<OneOrMany<ArtifactRequest>>,
) -> Reply<Vec<Artifact>> {
    let artifacts =
        controller::update_artifacts(&state, &user, &org, &project, &branch, body.into_vec())
            .await?;
    Ok(ok(artifacts))
}

pub async fn delete_artifacts(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Json(ids): Json<Vec<String>>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_artifacts(
        &state, &user, &org, &project, &branch, &ids,
    )?))
}

pub async fn get_artifact(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch, artifact)): Path<(String, String, String, String)>,
    Query(params): Query<ArchivedParam>,
) -> Reply<Artifact> {
    Ok(ok(controller::find_artifact(
        &state,
        &user,
        &org,
        &project,
        &branch,
        &artifact,
        params.archived,
    )?))
}

pub async fn create_artifact(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch, artifact)): Path<(String, String, String, String)>,
    Json(mut input): Json<ArtifactRequest>,
) -> Result<Response, ApiError> {
    ensure_unchanged("Artifact", "id", artifact.as_str(), input.id.as_deref())?;
    input.id = Some(artifact);
    let mut artifacts =
        controller::create_artifacts(&state, &user, &org, &project, &branch, vec![input]).await?;
    Ok(created(artifacts.pop()))
}

pub async fn update_artifact(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch, artifact)): Path<(String, String, String, String)>,
    Json(mut input): Json<ArtifactRequest>,
) -> Reply<Option<Artifact>> {
    ensure_unchanged("Artifact", "id", artifact.as_str(), input.id.as_deref())?;
    input.id = Some(artifact);
    let mut artifacts =
        controller::update_artifacts(&state, &user, &org, &project, &branch, vec![input]).await?;
    Ok(ok(artifacts.pop()))
}

pub async fn delete_artifact(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch, artifact)): Path<(String, String, String, String)>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_artifacts(
        &state,
        &user,
        &org,
        &project,
        &branch,
        &[artifact],
    )?))
}

pub async fn get_artifact_blob(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch, artifact)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError> {
    let (artifact, reader, size) =
        controller::get_artifact_blob(&state, &user, &org, &project, &branch, &artifact).await?;
    Ok(stream_blob(reader, size, &artifact.filename))
}

pub async fn get_blob(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Query(params): Query<BlobParams>,
) -> Result<Response, ApiError> {
    let (reader, size) = controller::get_blob(&state, &user, &org, &project, &params).await?;
    Ok(stream_blob(reader, size, &params.filename))
}

pub async fn post_blob(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Query(params): Query<BlobParams>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let info: BlobInfo =
        controller::post_blob(&state, &user, &org, &project, &params, body).await?;
    Ok(created(info))
}

pub async fn delete_blob(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
    Query(params): Query<BlobParams>,
) -> Result<StatusCode, ApiError> {
    controller::delete_blob(&state, &user, &org, &project, &params).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_blobs(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project)): Path<(String, String)>,
) -> Reply<Vec<BlobInfo>> {
    Ok(ok(controller::list_blobs(&state, &user, &org, &project).await?))
}
