use std::io::Read;
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::Response,
};
use flate2::read::GzDecoder;

use super::{MAX_UPLOAD_BYTES, content_type_is, created, ok};
use crate::auth::RequireUser;
use crate::controllers::elements::{self as controller, ElementView};
use crate::server::AppState;
use crate::server::dto::{ArchivedParam, ElementRequest, ListParams, OneOrMany};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::Element;
use crate::validators::ensure_unchanged;

type Reply<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn is_gzip(headers: &HeaderMap) -> bool {
    content_type_is(headers, "application/gzip")
        || headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
}

/// Reads a JSON element body, inflating it first when it is gzip-compressed.
fn parse_elements(headers: &HeaderMap, body: &Bytes) -> Result<Vec<ElementRequest>, ApiError> {
    let inflated;
    let json: &[u8] = if is_gzip(headers) {
        let mut data = Vec::new();
        GzDecoder::new(body.as_ref())
            .take(MAX_UPLOAD_BYTES as u64 + 1)
            .read_to_end(&mut data)
            .map_err(|_| ApiError::bad_request("Invalid gzip body"))?;
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(ApiError::bad_request("Decompressed body is too large"));
        }
        inflated = data;
        inflated.as_slice()
    } else {
        body.as_ref()
    };

    serde_json::from_slice::<OneOrMany<ElementRequest>>(json)
        .map(OneOrMany::into_vec)
        .map_err(|e| ApiError::bad_request(format!("Invalid element body: {e}")))
}

pub async fn list_elements(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Query(params): Query<ListParams>,
) -> Reply<Vec<Element>> {
    let ids = params.id_filter();
    Ok(ok(controller::find_elements(
        &state,
        &user,
        &org,
        &project,
        &branch,
        ids.as_deref(),
        params.archived,
    )?))
}

pub async fn create_elements(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let inputs = parse_elements(&headers, &body)?;
    Ok(created(controller::create_elements(
        &state, &user, &org, &project, &branch, inputs,
    )?))
}

pub async fn update_elements(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Json(body): Json<OneOrMany<ElementRequest>>,
) -> Reply<Vec<Element>> {
    Ok(ok(controller::update_elements(
        &state,
        &user,
        &org,
        &project,
        &branch,
        body.into_vec(),
    )?))
}

pub async fn delete_elements(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch)): Path<(String, String, String)>,
    Json(ids): Json<Vec<String>>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_elements(
        &state, &user, &org, &project, &branch, &ids,
    )?))
}

pub async fn get_element(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch, element)): Path<(String, String, String, String)>,
    Query(params): Query<ArchivedParam>,
) -> Reply<ElementView> {
    Ok(ok(controller::find_element(
        &state,
        &user,
        &org,
        &project,
        &branch,
        &element,
        params.archived,
    )?))
}

pub async fn create_element(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch, element)): Path<(String, String, String, String)>,
    Json(mut input): Json<ElementRequest>,
) -> Result<Response, ApiError> {
    ensure_unchanged("Element", "id", element.as_str(), input.id.as_deref())?;
    input.id = Some(element);
    let mut elements =
        controller::create_elements(&state, &user, &org, &project, &branch, vec![input])?;
    Ok(created(elements.pop()))
}

pub async fn update_element(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch, element)): Path<(String, String, String, String)>,
    Json(mut input): Json<ElementRequest>,
) -> Reply<Option<Element>> {
    ensure_unchanged("Element", "id", element.as_str(), input.id.as_deref())?;
    input.id = Some(element);
    let mut elements =
        controller::update_elements(&state, &user, &org, &project, &branch, vec![input])?;
    Ok(ok(elements.pop()))
}

pub async fn delete_element(
    RequireUser(user): RequireUser,
    State(state): State<Arc<AppState>>,
    Path((org, project, branch, element)): Path<(String, String, String, String)>,
) -> Reply<Vec<String>> {
    Ok(ok(controller::delete_elements(
        &state,
        &user,
        &org,
        &project,
        &branch,
        &[element],
    )?))
}
