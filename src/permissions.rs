//! Permission evaluation.
//!
//! One function per (resource, action) pair. Every function is a pure
//! predicate over already-fetched records: it returns `Ok(())` when the action
//! is allowed and a [`PermissionError`] describing the denied scope otherwise.
//! Global admins pass every check.
//!
//! Deleting orgs, projects and users is reserved to global admins no matter
//! what roles a user holds on the resource itself.

use thiserror::Error;

use crate::types::{Org, Project, Role, User, Visibility};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PermissionError {
    pub message: String,
}

impl PermissionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type Check = Result<(), PermissionError>;

/// Scope a webhook is attached to, resolved to the records whose roles
/// govern it. Branch-scoped webhooks are governed by their project.
#[derive(Debug, Clone, Copy)]
pub enum WebhookScope<'a> {
    Server,
    Org(&'a Org),
    Project(&'a Org, &'a Project),
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Check {
    if condition {
        Ok(())
    } else {
        Err(PermissionError::new(message()))
    }
}

fn admin_only(user: &User, action: &str) -> Check {
    ensure(user.admin, || {
        format!("User does not have permission to {action}.")
    })
}

fn org_member(user: &User, org: &Org) -> Check {
    ensure(org.permissions.contains_user(&user.username), || {
        format!(
            "User does not have permission to access the org [{}].",
            org.id
        )
    })
}

fn org_role(user: &User, org: &Org, role: Role, action: &str) -> Check {
    ensure(org.permissions.has(&user.username, role), || {
        format!(
            "User does not have permission to {action} in the org [{}].",
            org.id
        )
    })
}

fn project_read(user: &User, org: &Org, project: &Project, what: &str) -> Check {
    match project.visibility {
        Visibility::Internal => ensure(org.permissions.contains_user(&user.username), || {
            format!(
                "User does not have permission to read {what} in the project [{}].",
                project.id
            )
        }),
        Visibility::Private => ensure(project.permissions.has(&user.username, Role::Read), || {
            format!(
                "User does not have permission to read {what} in the project [{}].",
                project.id
            )
        }),
    }
}

fn project_role(user: &User, org: &Org, project: &Project, role: Role, action: &str) -> Check {
    org_member(user, org)?;
    ensure(project.permissions.has(&user.username, role), || {
        format!(
            "User does not have permission to {action} in the project [{}].",
            project.id
        )
    })
}

// Users

pub fn create_user(user: &User) -> Check {
    admin_only(user, "create users")
}

pub fn read_user(_user: &User) -> Check {
    Ok(())
}

pub fn update_user(user: &User, target: &User) -> Check {
    if user.admin {
        return Ok(());
    }
    ensure(user.username == target.username, || {
        format!(
            "User does not have permission to update the user [{}].",
            target.username
        )
    })
}

pub fn delete_user(user: &User) -> Check {
    admin_only(user, "delete users")
}

// Orgs

pub fn create_org(user: &User) -> Check {
    admin_only(user, "create orgs")
}

pub fn read_org(user: &User, org: &Org) -> Check {
    if user.admin {
        return Ok(());
    }
    ensure(org.permissions.contains_user(&user.username), || {
        format!("User does not have permission to find the org [{}].", org.id)
    })
}

pub fn update_org(user: &User, org: &Org) -> Check {
    if user.admin {
        return Ok(());
    }
    ensure(org.permissions.has(&user.username, Role::Admin), || {
        format!(
            "User does not have permission to update the org [{}].",
            org.id
        )
    })
}

pub fn delete_org(user: &User) -> Check {
    admin_only(user, "delete orgs")
}

// Projects

pub fn create_project(user: &User, org: &Org) -> Check {
    if user.admin {
        return Ok(());
    }
    org_role(user, org, Role::Write, "create projects")
}

pub fn read_project(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_read(user, org, project, "the project")
}

pub fn update_project(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Admin, "update the project")
}

pub fn delete_project(user: &User) -> Check {
    admin_only(user, "delete projects")
}

// Branches

pub fn create_branch(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "create branches")
}

pub fn read_branch(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_read(user, org, project, "branches")
}

pub fn update_branch(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "update branches")
}

pub fn delete_branch(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "delete branches")
}

// Elements

pub fn create_element(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "create elements")
}

pub fn read_element(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_read(user, org, project, "elements")
}

pub fn update_element(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "update elements")
}

pub fn delete_element(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "delete elements")
}

// Artifacts

pub fn create_artifact(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "create artifacts")
}

pub fn read_artifact(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_read(user, org, project, "artifacts")
}

pub fn update_artifact(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "update artifacts")
}

pub fn delete_artifact(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "delete artifacts")
}

// Blobs

pub fn create_blob(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "upload blobs")
}

pub fn read_blob(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_read(user, org, project, "blobs")
}

pub fn delete_blob(user: &User, org: &Org, project: &Project) -> Check {
    if user.admin {
        return Ok(());
    }
    project_role(user, org, project, Role::Write, "delete blobs")
}

// Webhooks

fn manage_webhook(user: &User, scope: WebhookScope<'_>, action: &str) -> Check {
    if user.admin {
        return Ok(());
    }
    match scope {
        WebhookScope::Server => admin_only(user, &format!("{action} server webhooks")),
        WebhookScope::Org(org) => org_role(user, org, Role::Admin, &format!("{action} webhooks")),
        WebhookScope::Project(org, project) => {
            project_role(user, org, project, Role::Admin, &format!("{action} webhooks"))
        }
    }
}

pub fn create_webhook(user: &User, scope: WebhookScope<'_>) -> Check {
    manage_webhook(user, scope, "create")
}

pub fn read_webhook(user: &User, scope: WebhookScope<'_>) -> Check {
    if user.admin {
        return Ok(());
    }
    match scope {
        WebhookScope::Server => admin_only(user, "read server webhooks"),
        WebhookScope::Org(org) => org_member(user, org),
        WebhookScope::Project(org, project) => project_read(user, org, project, "webhooks"),
    }
}

pub fn update_webhook(user: &User, scope: WebhookScope<'_>) -> Check {
    manage_webhook(user, scope, "update")
}

pub fn delete_webhook(user: &User, scope: WebhookScope<'_>) -> Check {
    manage_webhook(user, scope, "delete")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{Metadata, Permissions};

    fn user(username: &str, admin: bool) -> User {
        User {
            username: username.to_string(),
            admin,
            password_hash: String::new(),
            fname: None,
            lname: None,
            email: None,
            custom: json!({}),
            meta: Metadata::new(None),
        }
    }

    fn org(permissions: Permissions) -> Org {
        Org {
            id: "acme".to_string(),
            name: "Acme".to_string(),
            permissions,
            custom: json!({}),
            meta: Metadata::new(None),
        }
    }

    fn project(permissions: Permissions, visibility: Visibility) -> Project {
        Project {
            id: "acme:rocket".to_string(),
            org: "acme".to_string(),
            name: "Rocket".to_string(),
            permissions,
            visibility,
            custom: json!({}),
            meta: Metadata::new(None),
        }
    }

    #[test]
    fn test_admin_passes_everything() {
        let admin = user("root", true);
        let o = org(Permissions::new());
        let p = project(Permissions::new(), Visibility::Private);
        let target = user("someone", false);

        assert!(create_user(&admin).is_ok());
        assert!(update_user(&admin, &target).is_ok());
        assert!(delete_user(&admin).is_ok());
        assert!(create_org(&admin).is_ok());
        assert!(read_org(&admin, &o).is_ok());
        assert!(update_org(&admin, &o).is_ok());
        assert!(delete_org(&admin).is_ok());
        assert!(create_project(&admin, &o).is_ok());
        assert!(read_project(&admin, &o, &p).is_ok());
        assert!(update_project(&admin, &o, &p).is_ok());
        assert!(delete_project(&admin).is_ok());
        assert!(create_branch(&admin, &o, &p).is_ok());
        assert!(read_branch(&admin, &o, &p).is_ok());
        assert!(update_branch(&admin, &o, &p).is_ok());
        assert!(delete_branch(&admin, &o, &p).is_ok());
        assert!(create_element(&admin, &o, &p).is_ok());
        assert!(read_element(&admin, &o, &p).is_ok());
        assert!(update_element(&admin, &o, &p).is_ok());
        assert!(delete_element(&admin, &o, &p).is_ok());
        assert!(create_artifact(&admin, &o, &p).is_ok());
        assert!(read_artifact(&admin, &o, &p).is_ok());
        assert!(update_artifact(&admin, &o, &p).is_ok());
        assert!(delete_artifact(&admin, &o, &p).is_ok());
        assert!(create_blob(&admin, &o, &p).is_ok());
        assert!(read_blob(&admin, &o, &p).is_ok());
        assert!(delete_blob(&admin, &o, &p).is_ok());
        for scope in [
            WebhookScope::Server,
            WebhookScope::Org(&o),
            WebhookScope::Project(&o, &p),
        ] {
            assert!(create_webhook(&admin, scope).is_ok());
            assert!(read_webhook(&admin, scope).is_ok());
            assert!(update_webhook(&admin, scope).is_ok());
            assert!(delete_webhook(&admin, scope).is_ok());
        }
    }

    #[test]
    fn test_read_org_requires_membership() {
        let alice = user("alice", false);
        let bob = user("bob", false);
        let o = org(Permissions::from([("alice", Role::Read)]));

        assert!(read_org(&alice, &o).is_ok());
        let err = read_org(&bob, &o).unwrap_err();
        assert!(err.message.contains("[acme]"));
    }

    #[test]
    fn test_internal_project_read_uses_org_membership() {
        let alice = user("alice", false);
        let bob = user("bob", false);
        let o = org(Permissions::from([("alice", Role::Read)]));
        let p = project(Permissions::from([("bob", Role::Read)]), Visibility::Internal);

        assert!(read_project(&alice, &o, &p).is_ok());
        assert!(read_project(&bob, &o, &p).is_err());
        assert!(read_element(&alice, &o, &p).is_ok());
    }

    #[test]
    fn test_private_project_read_uses_project_roles() {
        let alice = user("alice", false);
        let bob = user("bob", false);
        let o = org(Permissions::from([("alice", Role::Read), ("bob", Role::Read)]));
        let p = project(Permissions::from([("bob", Role::Read)]), Visibility::Private);

        assert!(read_project(&alice, &o, &p).is_err());
        assert!(read_project(&bob, &o, &p).is_ok());
        assert!(read_branch(&bob, &o, &p).is_ok());
    }

    #[test]
    fn test_write_requires_project_write_and_org_membership() {
        let alice = user("alice", false);
        let o = org(Permissions::new());
        let p = project(Permissions::from([("alice", Role::Write)]), Visibility::Private);

        assert!(create_element(&alice, &o, &p).is_err());

        let o = org(Permissions::from([("alice", Role::Read)]));
        assert!(create_element(&alice, &o, &p).is_ok());
        assert!(create_branch(&alice, &o, &p).is_ok());
        assert!(update_project(&alice, &o, &p).is_err());
    }

    #[test]
    fn test_read_only_member_cannot_write() {
        let alice = user("alice", false);
        let o = org(Permissions::from([("alice", Role::Read)]));
        let p = project(Permissions::from([("alice", Role::Read)]), Visibility::Private);

        assert!(read_element(&alice, &o, &p).is_ok());
        assert!(create_element(&alice, &o, &p).is_err());
        assert!(delete_artifact(&alice, &o, &p).is_err());
        assert!(create_blob(&alice, &o, &p).is_err());
    }

    #[test]
    fn test_deletes_are_admin_only() {
        let alice = user("alice", false);
        assert!(delete_org(&alice).is_err());
        assert!(delete_project(&alice).is_err());
        assert!(delete_user(&alice).is_err());
        assert!(create_org(&alice).is_err());
        assert!(create_user(&alice).is_err());
    }

    #[test]
    fn test_update_user_self_only() {
        let alice = user("alice", false);
        let bob = user("bob", false);
        assert!(update_user(&alice, &alice).is_ok());
        assert!(update_user(&alice, &bob).is_err());
    }

    #[test]
    fn test_org_admin_manages_org_webhooks() {
        let alice = user("alice", false);
        let bob = user("bob", false);
        let o = org(Permissions::from([("alice", Role::Admin), ("bob", Role::Read)]));

        assert!(create_webhook(&alice, WebhookScope::Org(&o)).is_ok());
        assert!(create_webhook(&bob, WebhookScope::Org(&o)).is_err());
        assert!(read_webhook(&bob, WebhookScope::Org(&o)).is_ok());
        assert!(create_webhook(&alice, WebhookScope::Server).is_err());
        assert!(read_webhook(&alice, WebhookScope::Server).is_err());
    }
}
