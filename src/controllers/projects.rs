use std::collections::HashMap;

use serde_json::json;

use super::elements::root_elements;
use super::{
    MASTER_BRANCH, apply_permission_updates, check_permission_updates, emit, ensure_distinct,
    ensure_org_members, filter_ids, load_org, load_project, required,
};
use crate::error::{Error, Result};
use crate::id;
use crate::permissions;
use crate::server::AppState;
use crate::server::dto::ProjectRequest;
use crate::types::{Branch, Metadata, Org, Permissions, Project, Role, User};
use crate::validators::{ensure_unchanged, validate_custom, validate_name, validate_project_id};

fn check_fields(input: &ProjectRequest) -> Result<()> {
    if let Some(name) = &input.name {
        validate_name("name", name)?;
    }
    if let Some(custom) = &input.custom {
        validate_custom(custom)?;
    }
    Ok(())
}

/// Creates projects in `org_id`, each with a master branch and root elements.
pub fn create_projects(
    state: &AppState,
    user: &User,
    org_id: &str,
    inputs: Vec<ProjectRequest>,
) -> Result<Vec<Project>> {
    let store = state.store.as_ref();
    let mut org = load_org(store, org_id)?;
    permissions::create_project(user, &org)?;

    for input in &inputs {
        let leaf = required(input.id.as_deref(), "project id")?;
        validate_project_id(leaf)?;
        ensure_unchanged("Project", "org", org_id, input.org.as_deref())?;
        check_fields(input)?;
        if let Some(updates) = &input.permissions {
            check_permission_updates(store, user, updates)?;
        }
        let id = id::project_id(org_id, leaf);
        if store.get_project(&id)?.is_some() {
            return Err(Error::AlreadyExists(format!("Project [{id}]")));
        }
    }
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Project")?;

    let mut created = Vec::with_capacity(inputs.len());
    for input in inputs {
        let leaf = input.id.unwrap_or_default();
        let mut permissions = Permissions::new();
        let mut members = match &input.permissions {
            Some(updates) => apply_permission_updates(&mut permissions, updates),
            None => Vec::new(),
        };
        permissions.grant(user.username.clone(), Role::Admin);
        members.push(user.username.clone());

        let project = Project {
            id: id::project_id(org_id, &leaf),
            org: org_id.to_string(),
            name: input.name.unwrap_or_else(|| leaf.clone()),
            permissions,
            visibility: input.visibility.unwrap_or_default(),
            custom: input.custom.unwrap_or_else(|| json!({})),
            meta: Metadata::new(Some(&user.username)),
        };
        store.create_project(&project)?;

        let master = Branch {
            id: id::create_id(&[project.id.as_str(), MASTER_BRANCH]),
            project: project.id.clone(),
            name: "Master".to_string(),
            source: None,
            tag: false,
            custom: json!({}),
            meta: Metadata::new(Some(&user.username)),
        };
        store.create_branch(&master)?;
        store.create_elements(&root_elements(&master, user))?;

        ensure_org_members(store, &mut org, &members, user)?;

        emit(state, "projects-created", &project.id, &project);
        created.push(project);
    }

    tracing::info!(org = %org_id, count = created.len(), by = %user.username, "created projects");
    Ok(created)
}

pub fn find_projects(
    state: &AppState,
    user: &User,
    org_id: &str,
    ids: Option<&[String]>,
    include_archived: bool,
) -> Result<Vec<Project>> {
    let store = state.store.as_ref();
    let org = load_org(store, org_id)?;
    permissions::read_org(user, &org)?;

    let projects = store
        .list_projects(org_id, include_archived)?
        .into_iter()
        .filter(|p| permissions::read_project(user, &org, p).is_ok())
        .collect();
    let ids: Option<Vec<String>> =
        ids.map(|ids| ids.iter().map(|leaf| id::project_id(org_id, leaf)).collect());
    Ok(filter_ids(projects, ids.as_deref(), |p| &p.id))
}

/// Lists every project `user` can read, across orgs.
pub fn find_all_projects(state: &AppState, user: &User, include_archived: bool) -> Result<Vec<Project>> {
    let store = state.store.as_ref();
    let orgs: HashMap<String, Org> = store
        .list_orgs(include_archived)?
        .into_iter()
        .map(|o| (o.id.clone(), o))
        .collect();

    Ok(store
        .list_all_projects(include_archived)?
        .into_iter()
        .filter(|p| {
            orgs.get(&p.org)
                .is_some_and(|org| permissions::read_project(user, org, p).is_ok())
        })
        .collect())
}

pub fn find_project(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    include_archived: bool,
) -> Result<Project> {
    let (org, project) = load_project(state.store.as_ref(), org_id, project_id)?;
    permissions::read_project(user, &org, &project)?;
    if project.meta.archived && !include_archived {
        return Err(Error::not_found(format!("Project [{}]", project.id)));
    }
    Ok(project)
}

pub fn update_projects(
    state: &AppState,
    user: &User,
    org_id: &str,
    inputs: Vec<ProjectRequest>,
) -> Result<Vec<Project>> {
    let store = state.store.as_ref();
    let mut org = load_org(store, org_id)?;
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Project")?;

    let mut projects = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let leaf = required(input.id.as_deref(), "project id")?;
        let (_, project) = load_project(store, org_id, leaf)?;
        permissions::update_project(user, &org, &project)?;
        ensure_unchanged("Project", "org", project.org.as_str(), input.org.as_deref())?;
        check_fields(input)?;
        if let Some(updates) = &input.permissions {
            check_permission_updates(store, user, updates)?;
        }
        projects.push(project);
    }

    let mut updated = Vec::with_capacity(projects.len());
    for (input, mut project) in inputs.into_iter().zip(projects) {
        if let Some(name) = input.name {
            project.name = name;
        }
        if let Some(visibility) = input.visibility {
            project.visibility = visibility;
        }
        if let Some(custom) = input.custom {
            project.custom = custom;
        }
        if let Some(updates) = &input.permissions {
            let granted = apply_permission_updates(&mut project.permissions, updates);
            ensure_org_members(store, &mut org, &granted, user)?;
        }
        if let Some(archived) = input.archived {
            project.meta.set_archived(archived, &user.username);
        }
        project.meta.touch(&user.username);
        store.update_project(&project)?;
        emit(state, "projects-updated", &project.id, &project);
        updated.push(project);
    }
    Ok(updated)
}

pub fn update_project(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    mut input: ProjectRequest,
) -> Result<Project> {
    ensure_unchanged("Project", "id", project_id, input.id.as_deref())?;
    input.id = Some(project_id.to_string());
    let mut updated = update_projects(state, user, org_id, vec![input])?;
    updated
        .pop()
        .ok_or_else(|| Error::not_found(format!("Project [{org_id}:{project_id}]")))
}

/// Deletes projects with their branches, elements, artifacts, blobs and
/// scoped webhooks.
pub async fn delete_projects(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_ids: &[String],
) -> Result<Vec<String>> {
    permissions::delete_project(user)?;
    let store = state.store.as_ref();

    let mut projects = Vec::with_capacity(project_ids.len());
    for leaf in project_ids {
        let (_, project) = load_project(store, org_id, leaf)?;
        projects.push(project);
    }

    let mut deleted = Vec::with_capacity(projects.len());
    for project in projects {
        state.artifacts.delete_project(&project.id).await?;
        store.delete_webhooks_in_scope(&project.id)?;
        if store.delete_project(&project.id)? {
            emit(state, "projects-deleted", &project.id, &json!({ "id": project.id }));
            deleted.push(project.id);
        }
    }

    tracing::info!(org = %org_id, count = deleted.len(), by = %user.username, "deleted projects");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::orgs::create_orgs;
    use crate::controllers::testing::Fixture;
    use crate::server::dto::OrgRequest;
    use crate::types::{PermissionChange, Visibility};

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
        fx
    }

    fn request(id: &str) -> ProjectRequest {
        ProjectRequest {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_project_builds_master_and_roots() {
        let fx = setup();
        let project = create_projects(&fx.state, &fx.admin, "acme", vec![request("rocket")])
            .unwrap()
            .remove(0);
        assert_eq!(project.id, "acme:rocket");
        assert_eq!(project.visibility, Visibility::Private);

        let master = fx.store().get_branch("acme:rocket:master").unwrap().unwrap();
        assert!(master.source.is_none());

        let mut roots: Vec<String> = fx
            .store()
            .list_elements(&master.id, false)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        roots.sort();
        assert_eq!(
            roots,
            vec![
                "acme:rocket:master:__mbee__",
                "acme:rocket:master:holding_bin",
                "acme:rocket:master:model",
                "acme:rocket:master:undefined",
            ]
        );
    }

    #[test]
    fn test_project_org_is_immutable() {
        let fx = setup();
        let mut input = request("rocket");
        input.org = Some("other".to_string());
        assert!(matches!(
            create_projects(&fx.state, &fx.admin, "acme", vec![input]),
            Err(Error::Validation { .. })
        ));

        create_projects(&fx.state, &fx.admin, "acme", vec![request("rocket")]).unwrap();
        let mut input = request("rocket");
        input.org = Some("default".to_string());
        assert!(matches!(
            update_projects(&fx.state, &fx.admin, "acme", vec![input]),
            Err(Error::Validation { .. })
        ));
        let stored = fx.store().get_project("acme:rocket").unwrap().unwrap();
        assert_eq!(stored.org, "acme");
    }

    #[test]
    fn test_project_permission_adds_org_read() {
        let fx = setup();
        fx.add_user("alice");
        create_projects(&fx.state, &fx.admin, "acme", vec![request("rocket")]).unwrap();

        let mut input = request("rocket");
        input.permissions = Some([("alice".to_string(), PermissionChange::Write)].into());
        let project = update_projects(&fx.state, &fx.admin, "acme", vec![input])
            .unwrap()
            .remove(0);
        assert!(project.permissions.has("alice", Role::Write));

        let org = fx.store().get_org("acme").unwrap().unwrap();
        assert_eq!(org.permissions.roles("alice"), &[Role::Read]);
    }

    #[test]
    fn test_find_projects_respects_visibility() {
        let fx = setup();
        let alice = fx.add_user("alice");
        let mut internal = request("open");
        internal.visibility = Some(Visibility::Internal);
        create_projects(&fx.state, &fx.admin, "acme", vec![internal, request("secret")]).unwrap();

        let mut org = fx.store().get_org("acme").unwrap().unwrap();
        org.permissions.grant("alice", Role::Read);
        fx.store().update_org(&org).unwrap();

        let ids: Vec<String> = find_projects(&fx.state, &alice, "acme", None, false)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["acme:open"]);

        let all = find_all_projects(&fx.state, &alice, false).unwrap();
        assert_eq!(all.len(), 1);
        assert!(find_project(&fx.state, &alice, "acme", "secret", false).is_err());
    }

    #[test]
    fn test_find_all_projects_hides_archived_orgs() {
        let fx = setup();
        create_projects(&fx.state, &fx.admin, "acme", vec![request("rocket")]).unwrap();

        let mut org = fx.store().get_org("acme").unwrap().unwrap();
        org.meta.set_archived(true, "root");
        fx.store().update_org(&org).unwrap();

        let visible = find_all_projects(&fx.state, &fx.admin, false).unwrap();
        assert!(visible.iter().all(|p| p.org != "acme"));
        let all = find_all_projects(&fx.state, &fx.admin, true).unwrap();
        assert!(all.iter().any(|p| p.id == "acme:rocket"));
    }

    #[tokio::test]
    async fn test_delete_project_cascades() {
        let fx = setup();
        create_projects(&fx.state, &fx.admin, "acme", vec![request("rocket")]).unwrap();

        let deleted = delete_projects(&fx.state, &fx.admin, "acme", &["rocket".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, vec!["acme:rocket"]);
        assert!(fx.store().get_branch("acme:rocket:master").unwrap().is_none());
        assert!(
            fx.store()
                .get_element("acme:rocket:master:model")
                .unwrap()
                .is_none()
        );
    }
}
