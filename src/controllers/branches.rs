use serde_json::json;

use super::{
    MASTER_BRANCH, emit, ensure_distinct, filter_ids, load_branch, load_project, required,
};
use crate::error::{Error, Result};
use crate::id::{self, ID_DELIMITER};
use crate::permissions;
use crate::server::AppState;
use crate::server::dto::BranchRequest;
use crate::types::{Branch, Element, Metadata, User};
use crate::validators::{ensure_unchanged, validate_branch_id, validate_custom, validate_name};

/// Re-homes a full element id from one branch to another. Ids outside
/// `from` (cross-project references) are returned unchanged.
fn rebase(element_id: &str, from: &str, to: &str) -> String {
    match element_id
        .strip_prefix(from)
        .and_then(|rest| rest.strip_prefix(ID_DELIMITER))
    {
        Some(leaf) => id::create_id(&[to, leaf]),
        None => element_id.to_string(),
    }
}

/// Copies every element of `source` into `target`.
fn copy_elements(source: &[Element], from: &str, target: &Branch, by: &User) -> Vec<Element> {
    source
        .iter()
        .map(|element| Element {
            id: rebase(&element.id, from, &target.id),
            project: target.project.clone(),
            branch: target.id.clone(),
            name: element.name.clone(),
            element_type: element.element_type.clone(),
            documentation: element.documentation.clone(),
            parent: element.parent.as_deref().map(|p| rebase(p, from, &target.id)),
            source: element.source.as_deref().map(|s| rebase(s, from, &target.id)),
            target: element.target.as_deref().map(|t| rebase(t, from, &target.id)),
            custom: element.custom.clone(),
            meta: Metadata::new(Some(&by.username)),
        })
        .collect()
}

/// Creates branches, each copying the elements of its source branch.
pub fn create_branches(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    inputs: Vec<BranchRequest>,
) -> Result<Vec<Branch>> {
    let store = state.store.as_ref();
    let (org, project) = load_project(store, org_id, project_id)?;
    permissions::create_branch(user, &org, &project)?;

    for input in &inputs {
        let leaf = required(input.id.as_deref(), "branch id")?;
        validate_branch_id(leaf)?;
        ensure_unchanged("Branch", "project", project_id, input.project.as_deref())?;
        if let Some(name) = &input.name {
            validate_name("name", name)?;
        }
        if let Some(custom) = &input.custom {
            validate_custom(custom)?;
        }
        let id = id::branch_id(org_id, project_id, leaf);
        if store.get_branch(&id)?.is_some() {
            return Err(Error::AlreadyExists(format!("Branch [{id}]")));
        }
        let source = input.source.as_deref().unwrap_or(MASTER_BRANCH);
        load_branch(store, org_id, project_id, source)?;
    }
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Branch")?;

    let mut created = Vec::with_capacity(inputs.len());
    for input in inputs {
        let leaf = input.id.unwrap_or_default();
        let source_id = id::branch_id(
            org_id,
            project_id,
            input.source.as_deref().unwrap_or(MASTER_BRANCH),
        );
        let branch = Branch {
            id: id::branch_id(org_id, project_id, &leaf),
            project: project.id.clone(),
            name: input.name.unwrap_or_else(|| leaf.clone()),
            source: Some(source_id.clone()),
            tag: input.tag.unwrap_or(false),
            custom: input.custom.unwrap_or_else(|| json!({})),
            meta: Metadata::new(Some(&user.username)),
        };
        store.create_branch(&branch)?;

        let elements = store.list_elements(&source_id, true)?;
        store.create_elements(&copy_elements(&elements, &source_id, &branch, user))?;

        tracing::info!(branch = %branch.id, source = %source_id, elements = elements.len(), "created branch");
        emit(state, "branches-created", &branch.id, &branch);
        created.push(branch);
    }
    Ok(created)
}

pub fn find_branches(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    ids: Option<&[String]>,
    include_archived: bool,
) -> Result<Vec<Branch>> {
    let store = state.store.as_ref();
    let (org, project) = load_project(store, org_id, project_id)?;
    permissions::read_branch(user, &org, &project)?;

    let branches = store.list_branches(&project.id, include_archived)?;
    let ids: Option<Vec<String>> = ids.map(|ids| {
        ids.iter()
            .map(|leaf| id::branch_id(org_id, project_id, leaf))
            .collect()
    });
    Ok(filter_ids(branches, ids.as_deref(), |b| &b.id))
}

pub fn find_branch(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    include_archived: bool,
) -> Result<Branch> {
    let (org, project, branch) = load_branch(state.store.as_ref(), org_id, project_id, branch_id)?;
    permissions::read_branch(user, &org, &project)?;
    if branch.meta.archived && !include_archived {
        return Err(Error::not_found(format!("Branch [{}]", branch.id)));
    }
    Ok(branch)
}

pub fn update_branches(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    inputs: Vec<BranchRequest>,
) -> Result<Vec<Branch>> {
    let store = state.store.as_ref();
    let (org, project) = load_project(store, org_id, project_id)?;
    permissions::update_branch(user, &org, &project)?;
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Branch")?;

    let mut branches = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let leaf = required(input.id.as_deref(), "branch id")?;
        let (_, _, branch) = load_branch(store, org_id, project_id, leaf)?;
        ensure_unchanged("Branch", "project", project_id, input.project.as_deref())?;
        ensure_unchanged("Branch", "tag", &branch.tag, input.tag.as_ref())?;
        let current_source = branch.source.as_deref().map(id::leaf).unwrap_or_default();
        ensure_unchanged("Branch", "source", current_source, input.source.as_deref())?;
        if let Some(name) = &input.name {
            validate_name("name", name)?;
        }
        if let Some(custom) = &input.custom {
            validate_custom(custom)?;
        }
        if input.archived == Some(true) && leaf == MASTER_BRANCH {
            return Err(Error::BadRequest("The master branch cannot be archived.".to_string()));
        }
        branches.push(branch);
    }

    let mut updated = Vec::with_capacity(branches.len());
    for (input, mut branch) in inputs.into_iter().zip(branches) {
        if let Some(name) = input.name {
            branch.name = name;
        }
        if let Some(custom) = input.custom {
            branch.custom = custom;
        }
        if let Some(archived) = input.archived {
            branch.meta.set_archived(archived, &user.username);
        }
        branch.meta.touch(&user.username);
        store.update_branch(&branch)?;
        emit(state, "branches-updated", &branch.id, &branch);
        updated.push(branch);
    }
    Ok(updated)
}

pub fn update_branch(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    mut input: BranchRequest,
) -> Result<Branch> {
    ensure_unchanged("Branch", "id", branch_id, input.id.as_deref())?;
    input.id = Some(branch_id.to_string());
    let mut updated = update_branches(state, user, org_id, project_id, vec![input])?;
    updated
        .pop()
        .ok_or_else(|| Error::not_found(format!("Branch [{branch_id}]")))
}

/// Deletes branches with their elements and artifacts. Master is kept.
pub fn delete_branches(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_ids: &[String],
) -> Result<Vec<String>> {
    let store = state.store.as_ref();
    let (org, project) = load_project(store, org_id, project_id)?;
    permissions::delete_branch(user, &org, &project)?;

    for leaf in branch_ids {
        if leaf == MASTER_BRANCH {
            return Err(Error::BadRequest("The master branch cannot be deleted.".to_string()));
        }
        load_branch(store, org_id, project_id, leaf)?;
    }

    let mut deleted = Vec::with_capacity(branch_ids.len());
    for leaf in branch_ids {
        let id = id::branch_id(org_id, project_id, leaf);
        store.delete_webhooks_in_scope(&id)?;
        if store.delete_branch(&id)? {
            emit(state, "branches-deleted", &id, &json!({ "id": id }));
            deleted.push(id);
        }
    }
    Ok(deleted)
}
