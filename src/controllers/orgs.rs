use serde_json::json;

use super::{
    DEFAULT_ORG, apply_permission_updates, check_permission_updates, emit, ensure_distinct,
    filter_ids, load_org, required, revoke_from_projects,
};
use crate::error::{Error, Result};
use crate::permissions;
use crate::server::AppState;
use crate::server::dto::OrgRequest;
use crate::types::{Metadata, Org, Permissions, Role, User};
use crate::validators::{validate_custom, validate_name, validate_org_id};

pub fn create_orgs(state: &AppState, user: &User, inputs: Vec<OrgRequest>) -> Result<Vec<Org>> {
    permissions::create_org(user)?;
    let store = state.store.as_ref();

    for input in &inputs {
        let id = required(input.id.as_deref(), "org id")?;
        validate_org_id(id)?;
        if let Some(name) = &input.name {
            validate_name("name", name)?;
        }
        if let Some(custom) = &input.custom {
            validate_custom(custom)?;
        }
        if let Some(updates) = &input.permissions {
            check_permission_updates(store, user, updates)?;
        }
        if store.get_org(id)?.is_some() {
            return Err(Error::AlreadyExists(format!("Org [{id}]")));
        }
    }
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Org")?;

    let mut created = Vec::with_capacity(inputs.len());
    for input in inputs {
        let id = input.id.unwrap_or_default();
        let mut permissions = Permissions::new();
        if let Some(updates) = &input.permissions {
            apply_permission_updates(&mut permissions, updates);
        }
        permissions.grant(user.username.clone(), Role::Admin);

        let org = Org {
            name: input.name.unwrap_or_else(|| id.clone()),
            id,
            permissions,
            custom: input.custom.unwrap_or_else(|| json!({})),
            meta: Metadata::new(Some(&user.username)),
        };
        store.create_org(&org)?;
        emit(state, "orgs-created", &org.id, &org);
        created.push(org);
    }

    tracing::info!(count = created.len(), by = %user.username, "created orgs");
    Ok(created)
}

/// Lists the orgs `user` can read.
pub fn find_orgs(
    state: &AppState,
    user: &User,
    ids: Option<&[String]>,
    include_archived: bool,
) -> Result<Vec<Org>> {
    let orgs = state
        .store
        .list_orgs(include_archived)?
        .into_iter()
        .filter(|org| permissions::read_org(user, org).is_ok())
        .collect();
    Ok(filter_ids(orgs, ids, |o| &o.id))
}

pub fn find_org(state: &AppState, user: &User, org_id: &str, include_archived: bool) -> Result<Org> {
    let org = load_org(state.store.as_ref(), org_id)?;
    permissions::read_org(user, &org)?;
    if org.meta.archived && !include_archived {
        return Err(Error::not_found(format!("Org [{org_id}]")));
    }
    Ok(org)
}

pub fn update_orgs(state: &AppState, user: &User, inputs: Vec<OrgRequest>) -> Result<Vec<Org>> {
    let store = state.store.as_ref();
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Org")?;

    let mut orgs = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let id = required(input.id.as_deref(), "org id")?;
        let org = load_org(store, id)?;
        permissions::update_org(user, &org)?;
        if let Some(name) = &input.name {
            validate_name("name", name)?;
        }
        if let Some(custom) = &input.custom {
            validate_custom(custom)?;
        }
        if let Some(updates) = &input.permissions {
            check_permission_updates(store, user, updates)?;
        }
        if input.archived == Some(true) && org.id == DEFAULT_ORG {
            return Err(Error::BadRequest("The default org cannot be archived.".to_string()));
        }
        orgs.push(org);
    }

    let mut updated = Vec::with_capacity(orgs.len());
    for (input, mut org) in inputs.into_iter().zip(orgs) {
        if let Some(name) = input.name {
            org.name = name;
        }
        if let Some(custom) = input.custom {
            org.custom = custom;
        }
        if let Some(updates) = &input.permissions {
            apply_permission_updates(&mut org.permissions, updates);
            let removed: Vec<&str> = updates
                .iter()
                .filter(|(_, change)| change.role().is_none())
                .map(|(username, _)| username.as_str())
                .collect();
            revoke_from_projects(store, &org.id, &removed, user)?;
        }
        if let Some(archived) = input.archived {
            org.meta.set_archived(archived, &user.username);
        }
        org.meta.touch(&user.username);
        store.update_org(&org)?;
        emit(state, "orgs-updated", &org.id, &org);
        updated.push(org);
    }
    Ok(updated)
}

pub fn update_org(state: &AppState, user: &User, org_id: &str, mut input: OrgRequest) -> Result<Org> {
    crate::validators::ensure_unchanged("Org", "id", org_id, input.id.as_deref())?;
    input.id = Some(org_id.to_string());
    let mut updated = update_orgs(state, user, vec![input])?;
    updated
        .pop()
        .ok_or_else(|| Error::not_found(format!("Org [{org_id}]")))
}

/// Deletes orgs with everything inside them: projects, branches, elements,
/// artifacts, stored blobs and scoped webhooks.
pub async fn delete_orgs(state: &AppState, user: &User, ids: &[String]) -> Result<Vec<String>> {
    permissions::delete_org(user)?;
    let store = state.store.as_ref();

    for id in ids {
        if id == DEFAULT_ORG {
            return Err(Error::BadRequest("The default org cannot be deleted.".to_string()));
        }
        load_org(store, id)?;
    }

    let mut deleted = Vec::with_capacity(ids.len());
    for id in ids {
        for project in store.list_projects(id, true)? {
            state.artifacts.delete_project(&project.id).await?;
        }
        let hooks = store.delete_webhooks_in_scope(id)?;
        if store.delete_org(id)? {
            tracing::info!(org = %id, webhooks = hooks, by = %user.username, "deleted org");
            emit(state, "orgs-deleted", id, &json!({ "id": id }));
            deleted.push(id.clone());
        }
    }
    Ok(deleted)
}
