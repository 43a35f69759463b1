//! Resource operations behind the HTTP handlers.
//!
//! Each operation loads the records that scope the request, runs the
//! permission and field checks, writes through the store and emits webhook
//! events. Bulk operations check every item before the first write.

pub mod artifacts;
pub mod branches;
pub mod elements;
pub mod orgs;
pub mod projects;
pub mod users;
pub mod webhooks;

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::id;
use crate::server::AppState;
use crate::server::dto::PermissionUpdates;
use crate::store::Store;
use crate::types::{Branch, Org, Permissions, Project, Role, User};
use crate::webhooks::Event;

/// Org every new user joins.
pub const DEFAULT_ORG: &str = "default";
pub const MASTER_BRANCH: &str = "master";

pub(crate) fn load_org(store: &dyn Store, org_id: &str) -> Result<Org> {
    store
        .get_org(org_id)?
        .ok_or_else(|| Error::not_found(format!("Org [{org_id}]")))
}

pub(crate) fn load_project(store: &dyn Store, org_id: &str, project_id: &str) -> Result<(Org, Project)> {
    let org = load_org(store, org_id)?;
    let id = id::project_id(org_id, project_id);
    let project = store
        .get_project(&id)?
        .ok_or_else(|| Error::not_found(format!("Project [{id}]")))?;
    Ok((org, project))
}

pub(crate) fn load_branch(
    store: &dyn Store,
    org_id: &str,
    project_id: &str,
    branch_id: &str,
) -> Result<(Org, Project, Branch)> {
    let (org, project) = load_project(store, org_id, project_id)?;
    let id = id::branch_id(org_id, project_id, branch_id);
    let branch = store
        .get_branch(&id)?
        .ok_or_else(|| Error::not_found(format!("Branch [{id}]")))?;
    Ok((org, project, branch))
}

/// Rejects writes to tagged branches.
pub(crate) fn ensure_writable(branch: &Branch) -> Result<()> {
    if branch.tag {
        return Err(Error::BadRequest(format!(
            "Branch [{}] is a tag and cannot be modified.",
            branch.id
        )));
    }
    Ok(())
}

/// Returns an error naming the first id that appears twice.
pub(crate) fn ensure_distinct<'a>(ids: impl IntoIterator<Item = &'a str>, what: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(Error::BadRequest(format!(
                "{what} [{id}] appears more than once in the request."
            )));
        }
    }
    Ok(())
}

pub(crate) fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value.ok_or_else(|| Error::validation(field, "is required"))
}

/// Validates a permissions update against the store and the requester.
///
/// Every named user must exist, and users may not change their own entry
/// unless they are a global admin.
pub(crate) fn check_permission_updates(
    store: &dyn Store,
    requester: &User,
    updates: &PermissionUpdates,
) -> Result<()> {
    for username in updates.keys() {
        if username == &requester.username && !requester.admin {
            return Err(Error::Permission(crate::permissions::PermissionError::new(
                "User cannot update their own permissions.",
            )));
        }
        if store.get_user(username)?.is_none() {
            return Err(Error::not_found(format!("User [{username}]")));
        }
    }
    Ok(())
}

/// Applies a checked permissions update. Returns the users granted a role.
pub(crate) fn apply_permission_updates(
    permissions: &mut Permissions,
    updates: &PermissionUpdates,
) -> Vec<String> {
    let mut granted = Vec::new();
    for (username, change) in updates {
        match change.role() {
            Some(role) => {
                permissions.grant(username.clone(), role);
                granted.push(username.clone());
            }
            None => {
                permissions.revoke(username);
            }
        }
    }
    granted
}

/// Gives `usernames` read access to `org` when they have no entry there yet.
pub(crate) fn ensure_org_members(
    store: &dyn Store,
    org: &mut Org,
    usernames: &[String],
    by: &User,
) -> Result<()> {
    let missing: Vec<&String> = usernames
        .iter()
        .filter(|u| !org.permissions.contains_user(u))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    for username in missing {
        org.permissions.grant(username.clone(), Role::Read);
    }
    org.meta.touch(&by.username);
    store.update_org(org)
}

/// Drops `usernames` from every project of `org_id`. Project roles only hold
/// inside org membership, so removing a user from an org ends them here too.
pub(crate) fn revoke_from_projects(
    store: &dyn Store,
    org_id: &str,
    usernames: &[&str],
    by: &User,
) -> Result<()> {
    if usernames.is_empty() {
        return Ok(());
    }
    for mut project in store.list_projects(org_id, true)? {
        let mut changed = false;
        for username in usernames {
            changed |= project.permissions.revoke(username);
        }
        if changed {
            project.meta.touch(&by.username);
            store.update_project(&project)?;
            tracing::debug!(project = %project.id, "revoked removed org members");
        }
    }
    Ok(())
}

pub(crate) fn emit<T: Serialize>(state: &AppState, trigger: &str, scope: &str, data: &T) {
    let payload = serde_json::to_value(data).unwrap_or(Value::Null);
    state.webhooks.emit(Event::new(trigger, scope, payload));
}

pub(crate) fn filter_ids<T>(items: Vec<T>, ids: Option<&[String]>, key: impl Fn(&T) -> &str) -> Vec<T> {
    match ids {
        Some(ids) => items
            .into_iter()
            .filter(|item| ids.iter().any(|id| id == key(item)))
            .collect(),
        None => items,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PermissionChange;

    #[test]
    fn test_ensure_distinct() {
        assert!(ensure_distinct(["a", "b"], "Org").is_ok());
        let err = ensure_distinct(["a", "b", "a"], "Org").unwrap_err();
        assert!(err.to_string().contains("[a]"));
    }

    #[test]
    fn test_permission_updates() {
        let fixture = testing::Fixture::new();
        let alice = fixture.add_user("alice");

        let mut updates = PermissionUpdates::new();
        updates.insert("alice".to_string(), PermissionChange::Write);
        assert!(check_permission_updates(fixture.store(), &fixture.admin, &updates).is_ok());
        assert!(matches!(
            check_permission_updates(fixture.store(), &alice, &updates),
            Err(Error::Permission(_))
        ));

        updates.insert("ghost".to_string(), PermissionChange::Read);
        assert!(matches!(
            check_permission_updates(fixture.store(), &fixture.admin, &updates),
            Err(Error::NotFound(_))
        ));

        let mut permissions = Permissions::from([("bob", Role::Admin)]);
        let mut updates = PermissionUpdates::new();
        updates.insert("alice".to_string(), PermissionChange::Write);
        updates.insert("bob".to_string(), PermissionChange::RemoveAll);
        let granted = apply_permission_updates(&mut permissions, &updates);
        assert_eq!(granted, vec!["alice".to_string()]);
        assert_eq!(permissions.roles("alice"), &[Role::Read, Role::Write]);
        assert!(!permissions.contains_user("bob"));
    }
}
