use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use serde_json::json;

use super::{
    MASTER_BRANCH, emit, ensure_distinct, ensure_writable, filter_ids, load_branch, load_project,
};
use crate::error::{Error, Result};
use crate::id;
use crate::permissions;
use crate::server::AppState;
use crate::server::dto::{ElementRequest, Namespace};
use crate::store::Store;
use crate::types::{Branch, Element, Metadata, User, Visibility};
use crate::validators::{
    ROOT_ELEMENT_IDS, ensure_unchanged, validate_custom, validate_element_id, validate_name,
};

const MODEL: &str = "model";
const UNDEFINED: &str = "undefined";

/// A single element together with the ids of its children.
#[derive(Debug, Clone, Serialize)]
pub struct ElementView {
    #[serde(flatten)]
    pub element: Element,
    pub contains: Vec<String>,
}

/// The fixed elements every branch starts with.
pub(crate) fn root_elements(branch: &Branch, by: &User) -> Vec<Element> {
    let root = |leaf: &str, name: &str, parent: Option<&str>| Element {
        id: id::create_id(&[branch.id.as_str(), leaf]),
        project: branch.project.clone(),
        branch: branch.id.clone(),
        name: name.to_string(),
        element_type: String::new(),
        documentation: String::new(),
        parent: parent.map(|p| id::create_id(&[branch.id.as_str(), p])),
        source: None,
        target: None,
        custom: json!({}),
        meta: Metadata::new(Some(&by.username)),
    };
    vec![
        root(MODEL, "Model", None),
        root("__mbee__", "__mbee__", Some(MODEL)),
        root("holding_bin", "holding bin", Some("__mbee__")),
        root(UNDEFINED, "undefined element", Some("__mbee__")),
    ]
}

fn is_root(leaf: &str) -> bool {
    ROOT_ELEMENT_IDS.contains(&leaf)
}

fn check_fields(input: &ElementRequest) -> Result<()> {
    if let Some(name) = &input.name {
        validate_name("name", name)?;
    }
    if let Some(custom) = &input.custom {
        validate_custom(custom)?;
    }
    Ok(())
}

/// Resolves a source or target reference to a full element id.
///
/// Without a namespace the element lives in `branch` and must exist there or
/// be part of `pending`. A namespace may point at another project of the same
/// org, which has to be internal.
fn resolve_relationship(
    store: &dyn Store,
    branch: &Branch,
    field: &str,
    leaf: &str,
    namespace: Option<&Namespace>,
    pending: &HashSet<String>,
) -> Result<String> {
    let Some(ns) = namespace else {
        let id = id::create_id(&[branch.id.as_str(), leaf]);
        if !pending.contains(&id) && store.get_element(&id)?.is_none() {
            return Err(Error::not_found(format!("Element [{id}] referenced by {field}")));
        }
        return Ok(id);
    };

    let org_id = id::parent_id(&branch.project).unwrap_or_default();
    if ns.org != org_id {
        return Err(Error::BadRequest(format!(
            "Element {field} cannot reference org [{}].",
            ns.org
        )));
    }
    let (_, project) = load_project(store, &ns.org, &ns.project)?;
    if project.id != branch.project && project.visibility != Visibility::Internal {
        return Err(Error::BadRequest(format!(
            "Element {field} cannot reference project [{}] which is not internal.",
            project.id
        )));
    }
    let branch_leaf = ns.branch.as_deref().unwrap_or(MASTER_BRANCH);
    let id = id::element_id(&ns.org, &ns.project, branch_leaf, leaf);
    if !pending.contains(&id) && store.get_element(&id)?.is_none() {
        return Err(Error::not_found(format!("Element [{id}] referenced by {field}")));
    }
    Ok(id)
}

/// Walks up from `start` using `overrides` before stored parents and fails
/// if `id` is reached.
fn ensure_not_ancestor(
    store: &dyn Store,
    overrides: &HashMap<String, String>,
    id: &str,
    start: &str,
) -> Result<()> {
    let mut seen = HashSet::new();
    let mut current = Some(start.to_string());
    while let Some(node) = current {
        if node == id || !seen.insert(node.clone()) {
            return Err(Error::BadRequest(format!(
                "Element [{id}] cannot be moved under its own descendant."
            )));
        }
        current = match overrides.get(&node) {
            Some(parent) => Some(parent.clone()),
            None => store.get_element(&node)?.and_then(|e| e.parent),
        };
    }
    Ok(())
}

/// Creates elements on a branch. Parents default to the `model` root and
/// may be other elements of the same request.
pub fn create_elements(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    inputs: Vec<ElementRequest>,
) -> Result<Vec<Element>> {
    let store = state.store.as_ref();
    let (org, project, branch) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::create_element(user, &org, &project)?;
    ensure_writable(&branch)?;
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Element")?;

    let full_id = |leaf: &str| id::create_id(&[branch.id.as_str(), leaf]);
    let mut pending = HashSet::new();
    for input in &inputs {
        let leaf = super::required(input.id.as_deref(), "element id")?;
        validate_element_id(leaf)?;
        ensure_unchanged("Element", "project", project_id, input.project.as_deref())?;
        ensure_unchanged("Element", "branch", branch_id, input.branch.as_deref())?;
        check_fields(input)?;
        let id = full_id(leaf);
        if store.get_element(&id)?.is_some() {
            return Err(Error::AlreadyExists(format!("Element [{id}]")));
        }
        pending.insert(id);
    }

    let mut elements = Vec::with_capacity(inputs.len());
    let mut parents = HashMap::new();
    for input in inputs {
        let id = full_id(input.id.as_deref().unwrap_or_default());
        let parent_leaf = input.parent.as_deref().unwrap_or(MODEL);
        let parent = full_id(parent_leaf);
        if parent == id {
            return Err(Error::BadRequest(format!("Element [{id}] cannot be its own parent.")));
        }
        if !pending.contains(&parent) && store.get_element(&parent)?.is_none() {
            return Err(Error::not_found(format!("Parent element [{parent}]")));
        }
        let source = input
            .source
            .as_deref()
            .map(|leaf| {
                resolve_relationship(store, &branch, "source", leaf, input.source_namespace.as_ref(), &pending)
            })
            .transpose()?;
        let target = input
            .target
            .as_deref()
            .map(|leaf| {
                resolve_relationship(store, &branch, "target", leaf, input.target_namespace.as_ref(), &pending)
            })
            .transpose()?;

        parents.insert(id.clone(), parent.clone());
        elements.push(Element {
            id,
            project: project.id.clone(),
            branch: branch.id.clone(),
            name: input.name.unwrap_or_default(),
            element_type: input.element_type.unwrap_or_default(),
            documentation: input.documentation.unwrap_or_default(),
            parent: Some(parent),
            source,
            target,
            custom: input.custom.unwrap_or_else(|| json!({})),
            meta: Metadata::new(Some(&user.username)),
        });
    }

    // Parents inside the batch must still lead back to a stored element.
    for element in &elements {
        if let Some(parent) = &element.parent {
            ensure_not_ancestor(store, &parents, &element.id, parent)?;
        }
    }

    store.create_elements(&elements)?;
    tracing::debug!(branch = %branch.id, count = elements.len(), "created elements");
    emit(state, "elements-created", &branch.id, &elements);
    Ok(elements)
}

pub fn find_elements(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    ids: Option<&[String]>,
    include_archived: bool,
) -> Result<Vec<Element>> {
    let store = state.store.as_ref();
    let (org, project, branch) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::read_element(user, &org, &project)?;

    let elements = store.list_elements(&branch.id, include_archived)?;
    let ids: Option<Vec<String>> = ids.map(|ids| {
        ids.iter()
            .map(|leaf| id::create_id(&[branch.id.as_str(), leaf.as_str()]))
            .collect()
    });
    Ok(filter_ids(elements, ids.as_deref(), |e| &e.id))
}

pub fn find_element(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    element_id: &str,
    include_archived: bool,
) -> Result<ElementView> {
    let store = state.store.as_ref();
    let (org, project, _) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::read_element(user, &org, &project)?;

    let id = id::element_id(org_id, project_id, branch_id, element_id);
    let element = store
        .get_element(&id)?
        .filter(|e| include_archived || !e.meta.archived)
        .ok_or_else(|| Error::not_found(format!("Element [{id}]")))?;
    let contains = store.list_children(&id, include_archived)?;
    Ok(ElementView { element, contains })
}

pub fn update_elements(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    inputs: Vec<ElementRequest>,
) -> Result<Vec<Element>> {
    let store = state.store.as_ref();
    let (org, project, branch) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::update_element(user, &org, &project)?;
    ensure_writable(&branch)?;
    ensure_distinct(inputs.iter().filter_map(|i| i.id.as_deref()), "Element")?;

    let full_id = |leaf: &str| id::create_id(&[branch.id.as_str(), leaf]);
    let no_pending = HashSet::new();
    let mut moves = HashMap::new();
    let mut elements = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let leaf = super::required(input.id.as_deref(), "element id")?;
        let id = full_id(leaf);
        let mut element = store
            .get_element(&id)?
            .ok_or_else(|| Error::not_found(format!("Element [{id}]")))?;
        ensure_unchanged("Element", "project", project_id, input.project.as_deref())?;
        ensure_unchanged("Element", "branch", branch_id, input.branch.as_deref())?;
        check_fields(input)?;

        if let Some(parent_leaf) = input.parent.as_deref() {
            let parent = full_id(parent_leaf);
            if element.parent.as_deref() != Some(parent.as_str()) {
                if is_root(leaf) {
                    return Err(Error::BadRequest(format!("Root element [{id}] cannot be moved.")));
                }
                if parent == id {
                    return Err(Error::BadRequest(format!("Element [{id}] cannot be its own parent.")));
                }
                if store.get_element(&parent)?.is_none() {
                    return Err(Error::not_found(format!("Parent element [{parent}]")));
                }
                moves.insert(id.clone(), parent.clone());
                element.parent = Some(parent);
            }
        }
        if input.archived == Some(true) && is_root(leaf) {
            return Err(Error::BadRequest(format!("Root element [{id}] cannot be archived.")));
        }
        if let Some(source) = input.source.as_deref() {
            element.source = Some(resolve_relationship(
                store,
                &branch,
                "source",
                source,
                input.source_namespace.as_ref(),
                &no_pending,
            )?);
        }
        if let Some(target) = input.target.as_deref() {
            element.target = Some(resolve_relationship(
                store,
                &branch,
                "target",
                target,
                input.target_namespace.as_ref(),
                &no_pending,
            )?);
        }
        elements.push(element);
    }

    for (id, parent) in &moves {
        ensure_not_ancestor(store, &moves, id, parent)?;
    }

    let mut updated = Vec::with_capacity(elements.len());
    for (input, mut element) in inputs.into_iter().zip(elements) {
        if let Some(name) = input.name {
            element.name = name;
        }
        if let Some(element_type) = input.element_type {
            element.element_type = element_type;
        }
        if let Some(documentation) = input.documentation {
            element.documentation = documentation;
        }
        if let Some(custom) = input.custom {
            element.custom = custom;
        }
        if let Some(archived) = input.archived {
            element.meta.set_archived(archived, &user.username);
        }
        element.meta.touch(&user.username);
        store.update_element(&element)?;
        updated.push(element);
    }

    emit(state, "elements-updated", &branch.id, &updated);
    Ok(updated)
}

/// Deletes elements and their subtrees. Relationships into the deleted
/// elements are re-pointed to the branch's `undefined` element.
pub fn delete_elements(
    state: &AppState,
    user: &User,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
    element_ids: &[String],
) -> Result<Vec<String>> {
    let store = state.store.as_ref();
    let (org, project, branch) = load_branch(store, org_id, project_id, branch_id)?;
    permissions::delete_element(user, &org, &project)?;
    ensure_writable(&branch)?;

    let mut doomed = BTreeSet::new();
    for leaf in element_ids {
        let id = id::create_id(&[branch.id.as_str(), leaf.as_str()]);
        if is_root(leaf) {
            return Err(Error::BadRequest(format!("Root element [{id}] cannot be deleted.")));
        }
        if store.get_element(&id)?.is_none() {
            return Err(Error::not_found(format!("Element [{id}]")));
        }
        doomed.extend(store.element_subtree(&id)?);
    }

    let ids: Vec<String> = doomed.into_iter().collect();
    let placeholder = id::create_id(&[branch.id.as_str(), UNDEFINED]);
    let count = store.delete_elements(&ids, &placeholder)?;

    tracing::info!(branch = %branch.id, count, by = %user.username, "deleted elements");
    emit(state, "elements-deleted", &branch.id, &ids);
    Ok(ids)
}
