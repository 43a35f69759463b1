use bytes::Bytes;
use serde_json::json;

use super::{emit, ensure_distinct, ensure_writable, filter_ids, load_branch, load_project, required};
use crate::artifact::BlobReader;
use crate::error::{Error, Result};
use crate::id;
use crate::permissions;
use crate::server::AppState;
use crate::server::dto::{ArtifactRequest, BlobParams};
use crate::types::{Artifact, BlobInfo, Metadata, User};
use crate::validators::{
    ensure_unchanged, validate_artifact_id, validate_custom, validate_filename, validate_location,
    validate_name,
};

fn normalize_location(location: &str) -> &str {
    location.trim_end_matches('/')
}

fn check_fields(input: &ArtifactRequest) -> Result<()> {
    if let Some(name) = &input.name {
        validate_name("name", name)?;
    }
    if let Some(location) = &input.location {
        validate_location(location)?;
    }
    if let Some(filename) = &input.filename {
        validate_filename(filename)?;
    }
    if let Some(custom) = &input.custom {
        validate_custom(custom)?;
    }
    Ok(())
}

/// Size of the stored blob an artifact points at, or 0 if none is stored.
async fn blob_size(state: &AppState, project: &str, location: &str, filename: &str) -> Result<i64> {
    let size = state
        .artifacts
        .size(project, location, filename)
        .await?
        .unwrap_or(0);
    Ok(i64::try_from(size).unwrap_or(i64::MAX))
}

pub async fn create_artifacts(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    inputs: Vec<ArtifactRequest>,
) -> Result<Vec<Artifact>> {
    let store = state.store.as_ref();
    let (org, project, branch) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::create_artifact(user, &org, &project)?;
    ensure_writable(&branch)?;

    for input in &inputs {
        let leaf = required(input.id.as_deref(), "artifact id")?;
        validate_artifact_id(leaf)?;
        required(input.filename.as_deref(), "filename")?;
        ensure_unchanged("Artifact", "project", project_id, input.project.as_deref())?;
        ensure_unchanged("Artifact", "branch", branch_id, input.branch.as_deref())?;
        check_fields(input)?;
        let id = id::create_id(&[branch.id.as_str(), leaf]);
        if store.get_artifact(&id)?.is_some() {
            return Err(Error::AlreadyExists(format!("Artifact [{id}]")));
        }
    }
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Artifact")?;

    let mut created = Vec::with_capacity(inputs.len());
    for input in inputs {
        let leaf = input.id.unwrap_or_default();
        let location = normalize_location(input.location.as_deref().unwrap_or_default()).to_string();
        let filename = input.filename.unwrap_or_default();
        let size = blob_size(state, &project.id, &location, &filename).await?;

        let artifact = Artifact {
            id: id::create_id(&[branch.id.as_str(), leaf.as_str()]),
            project: project.id.clone(),
            branch: branch.id.clone(),
            name: input.name.unwrap_or_else(|| leaf.clone()),
            location,
            filename,
            strategy: state.artifacts.name().to_string(),
            size,
            custom: input.custom.unwrap_or_else(|| json!({})),
            meta: Metadata::new(Some(&user.username)),
        };
        store.create_artifact(&artifact)?;
        created.push(artifact);
    }

    emit(state, "artifacts-created", &branch.id, &created);
    Ok(created)
}

pub fn find_artifacts(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    ids: Option<&[String]>,
    include_archived: bool,
) -> Result<Vec<Artifact>> {
    let store = state.store.as_ref();
    let (org, project, branch) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::read_artifact(user, &org, &project)?;

    let artifacts = store.list_artifacts(&branch.id, include_archived)?;
    let ids: Option<Vec<String>> = ids.map(|ids| {
        ids.iter()
            .map(|leaf| id::create_id(&[branch.id.as_str(), leaf.as_str()]))
            .collect()
    });
    Ok(filter_ids(artifacts, ids.as_deref(), |a| &a.id))
}

pub fn find_artifact(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    artifact_id: &str,
    include_archived: bool,
) -> Result<Artifact> {
    let store = state.store.as_ref();
    let (org, project, branch) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::read_artifact(user, &org, &project)?;

    let id = id::create_id(&[branch.id.as_str(), artifact_id]);
    store
        .get_artifact(&id)?
        .filter(|a| include_archived || !a.meta.archived)
        .ok_or_else(|| Error::not_found(format!("Artifact [{id}]")))
}

pub async fn update_artifacts(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    inputs: Vec<ArtifactRequest>,
) -> Result<Vec<Artifact>> {
    let store = state.store.as_ref();
    let (org, project, branch) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::update_artifact(user, &org, &project)?;
    ensure_writable(&branch)?;
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Artifact")?;

    let mut artifacts = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let leaf = required(input.id.as_deref(), "artifact id")?;
        let id = id::create_id(&[branch.id.as_str(), leaf]);
        let artifact = store
            .get_artifact(&id)?
            .ok_or_else(|| Error::not_found(format!("Artifact [{id}]")))?;
        ensure_unchanged("Artifact", "project", project_id, input.project.as_deref())?;
        ensure_unchanged("Artifact", "branch", branch_id, input.branch.as_deref())?;
        check_fields(input)?;
        artifacts.push(artifact);
    }

    let mut updated = Vec::with_capacity(artifacts.len());
    for (input, mut artifact) in inputs.into_iter().zip(artifacts) {
        let mut moved = false;
        if let Some(location) = input.location {
            moved |= normalize_location(&location) != artifact.location;
            artifact.location = normalize_location(&location).to_string();
        }
        if let Some(filename) = input.filename {
            moved |= filename != artifact.filename;
            artifact.filename = filename;
        }
        if moved {
            artifact.size =
                blob_size(state, &project.id, &artifact.location, &artifact.filename).await?;
        }
        if let Some(name) = input.name {
            artifact.name = name;
        }
        if let Some(custom) = input.custom {
            artifact.custom = custom;
        }
        if let Some(archived) = input.archived {
            artifact.meta.set_archived(archived, &user.username);
        }
        artifact.meta.touch(&user.username);
        store.update_artifact(&artifact)?;
        updated.push(artifact);
    }

    emit(state, "artifacts-updated", &branch.id, &updated);
    Ok(updated)
}

/// Deletes artifact records. Stored blobs are left in place.
pub fn delete_artifacts(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    artifact_ids: &[String],
) -> Result<Vec<String>> {
    let store = state.store.as_ref();
    let (org, project, branch) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::delete_artifact(user, &org, &project)?;
    ensure_writable(&branch)?;

    let ids: Vec<String> = artifact_ids
        .iter()
        .map(|leaf| id::create_id(&[branch.id.as_str(), leaf.as_str()]))
        .collect();
    for id in &ids {
        if store.get_artifact(id)?.is_none() {
            return Err(Error::not_found(format!("Artifact [{id}]")));
        }
    }

    let mut deleted = Vec::with_capacity(ids.len());
    for id in ids {
        if store.delete_artifact(&id)? {
            deleted.push(id);
        }
    }
    emit(state, "artifacts-deleted", &branch.id, &deleted);
    Ok(deleted)
}

/// Opens the blob behind an artifact record.
pub async fn get_artifact_blob(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    artifact_id: &str,
) -> Result<(Artifact, BlobReader, u64)> {
    let artifact = find_artifact(state, user, org_id, project_id, branch_id, artifact_id, true)?;
    let (org, project) = load_project(state.store.as_ref(), org_id, project_id)?;
    permissions::read_blob(user, &org, &project)?;
    let (reader, size) = state
        .artifacts
        .open(&artifact.project, &artifact.location, &artifact.filename)
        .await?;
    Ok((artifact, reader, size))
}

pub async fn post_blob(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    params: &BlobParams,
    data: Bytes,
) -> Result<BlobInfo> {
    let (org, project) = load_project(state.store.as_ref(), org_id, project_id)?;
    permissions::create_blob(user, &org, &project)?;
    validate_location(&params.location)?;
    validate_filename(&params.filename)?;

    let location = normalize_location(&params.location);
    let size = state
        .artifacts
        .put(&project.id, location, &params.filename, data)
        .await?;
    tracing::info!(project = %project.id, location, filename = %params.filename, size, "stored blob");
    Ok(BlobInfo {
        location: location.to_string(),
        filename: params.filename.clone(),
        size,
    })
}

pub async fn get_blob(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    params: &BlobParams,
) -> Result<(BlobReader, u64)> {
    let (org, project) = load_project(state.store.as_ref(), org_id, project_id)?;
    permissions::read_blob(user, &org, &project)?;
    Ok(state
        .artifacts
        .open(&project.id, normalize_location(&params.location), &params.filename)
        .await?)
}

pub async fn delete_blob(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    params: &BlobParams,
) -> Result<()> {
    let (org, project) = load_project(state.store.as_ref(), org_id, project_id)?;
    permissions::delete_blob(user, &org, &project)?;
    let location = normalize_location(&params.location);
    if !state
        .artifacts
        .delete(&project.id, location, &params.filename)
        .await?
    {
        return Err(Error::not_found(format!(
            "Blob [{location}/{}]",
            params.filename
        )));
    }
    tracing::info!(project = %project.id, location, filename = %params.filename, "deleted blob");
    Ok(())
}

pub async fn list_blobs(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
) -> Result<Vec<BlobInfo>> {
    let (org, project) = load_project(state.store.as_ref(), org_id, project_id)?;
    permissions::read_blob(user, &org, &project)?;
    Ok(state.artifacts.list(&project.id).await?)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::controllers::orgs::create_orgs;
    use crate::controllers::projects::create_projects;
    use crate::controllers::testing::Fixture;
    use crate::server::dto::{OrgRequest, ProjectRequest};

    fn setup() -> Fixture {
        let fx = Fixture::new();
        create_orgs(
            &fx.state,
            &fx.admin,
            vec![OrgRequest {
                id: Some("acme".to_string()),
                ..Default::default()
            }],
        )
        .unwrap();
        create_projects(
            &fx.state,
            &fx.admin,
            "acme",
            vec![ProjectRequest {
                id: Some("rocket".to_string()),
                ..Default::default()
            }],
        )
        .unwrap();
        fx
    }

    fn params(location: &str, filename: &str) -> BlobParams {
        BlobParams {
            location: location.to_string(),
            filename: filename.to_string(),
        }
    }

    fn request(id: &str, location: &str, filename: &str) -> ArtifactRequest {
        ArtifactRequest {
            id: Some(id.to_string()),
            location: Some(location.to_string()),
            filename: Some(filename.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_blob_lifecycle() {
        let fx = setup();
        let info = post_blob(
            &fx.state,
            &fx.admin,
            "acme",
            "rocket",
            &params("models/", "engine.xml"),
            Bytes::from_static(b"<engine/>"),
        )
        .await
        .unwrap();
        assert_eq!(info.location, "models");
        assert_eq!(info.size, 9);

        let blobs = list_blobs(&fx.state, &fx.admin, "acme", "rocket").await.unwrap();
        assert_eq!(blobs.len(), 1);

        let (mut reader, size) =
            get_blob(&fx.state, &fx.admin, "acme", "rocket", &params("models", "engine.xml"))
                .await
                .unwrap();
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(size, 9);
        assert_eq!(body, b"<engine/>");

        delete_blob(&fx.state, &fx.admin, "acme", "rocket", &params("models", "engine.xml"))
            .await
            .unwrap();
        assert!(matches!(
            delete_blob(&fx.state, &fx.admin, "acme", "rocket", &params("models", "engine.xml")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blob_paths_are_validated() {
        let fx = setup();
        let result = post_blob(
            &fx.state,
            &fx.admin,
            "acme",
            "rocket",
            &params("../escape", "x.bin"),
            Bytes::from_static(b"x"),
        )
        .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_artifact_records_track_blob_size() {
        let fx = setup();
        post_blob(
            &fx.state,
            &fx.admin,
            "acme",
            "rocket",
            &params("", "drawing.pdf"),
            Bytes::from_static(b"%PDF-1.7"),
        )
        .await
        .unwrap();

        let created = create_artifacts(
            &fx.state,
            &fx.admin,
            "acme",
            "rocket",
            "master",
            vec![request("drawing", "", "drawing.pdf")],
        )
        .await
        .unwrap();
        assert_eq!(created[0].id, "acme:rocket:master:drawing");
        assert_eq!(created[0].size, 8);
        assert_eq!(created[0].strategy, "local");

        let (artifact, _, size) =
            get_artifact_blob(&fx.state, &fx.admin, "acme", "rocket", "master", "drawing")
                .await
                .unwrap();
        assert_eq!(artifact.filename, "drawing.pdf");
        assert_eq!(size, 8);

        let updated = update_artifacts(
            &fx.state,
            &fx.admin,
            "acme",
            "rocket",
            "master",
            vec![request("drawing", "docs", "missing.pdf")],
        )
        .await
        .unwrap();
        assert_eq!(updated[0].size, 0);
    }

    #[tokio::test]
    async fn test_delete_artifacts_keeps_blob() {
        let fx = setup();
        post_blob(
            &fx.state,
            &fx.admin,
            "acme",
            "rocket",
            &params("", "a.txt"),
            Bytes::from_static(b"a"),
        )
        .await
        .unwrap();
        create_artifacts(
            &fx.state,
            &fx.admin,
            "acme",
            "rocket",
            "master",
            vec![request("a", "", "a.txt")],
        )
        .await
        .unwrap();

        let deleted =
            delete_artifacts(&fx.state, &fx.admin, "acme", "rocket", "master", &["a".to_string()])
                .unwrap();
        assert_eq!(deleted, vec!["acme:rocket:master:a"]);
        assert!(
            find_artifacts(&fx.state, &fx.admin, "acme", "rocket", "master", None, false)
                .unwrap()
                .is_empty()
        );
        assert_eq!(list_blobs(&fx.state, &fx.admin, "acme", "rocket").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blob_access_requires_project_write() {
        let fx = setup();
        let alice = fx.add_user("alice");
        let result = post_blob(
            &fx.state,
            &alice,
            "acme",
            "rocket",
            &params("", "a.txt"),
            Bytes::from_static(b"a"),
        )
        .await;
        assert!(matches!(result, Err(Error::Permission(_))));
    }
}
