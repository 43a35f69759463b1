use serde_json::json;

use super::{DEFAULT_ORG, emit, ensure_distinct, filter_ids, required};
use crate::auth::{hash_password, verify_password};
use crate::error::{Error, Result};
use crate::permissions;
use crate::server::AppState;
use crate::server::dto::{PasswordRequest, UserRequest};
use crate::types::{Metadata, Role, User};
use crate::validators::{
    ensure_unchanged, validate_custom, validate_email, validate_password, validate_person_name,
    validate_username,
};

fn check_profile(input: &UserRequest) -> Result<()> {
    if let Some(fname) = &input.fname {
        validate_person_name("fname", fname)?;
    }
    if let Some(lname) = &input.lname {
        validate_person_name("lname", lname)?;
    }
    if let Some(email) = &input.email {
        validate_email(email)?;
    }
    if let Some(custom) = &input.custom {
        validate_custom(custom)?;
    }
    Ok(())
}

pub fn create_users(state: &AppState, user: &User, inputs: Vec<UserRequest>) -> Result<Vec<User>> {
    permissions::create_user(user)?;
    let store = state.store.as_ref();

    for input in &inputs {
        let username = required(input.username.as_deref(), "username")?;
        validate_username(username)?;
        validate_password(required(input.password.as_deref(), "password")?)?;
        check_profile(input)?;
        if store.get_user(username)?.is_some() {
            return Err(Error::AlreadyExists(format!("User [{username}]")));
        }
    }
    ensure_distinct(inputs.iter().filter_map(|i| i.username.as_deref()), "User")?;

    let mut created = Vec::with_capacity(inputs.len());
    for input in inputs {
        let new_user = User {
            username: input.username.unwrap_or_default(),
            admin: input.admin.unwrap_or(false),
            password_hash: hash_password(input.password.as_deref().unwrap_or_default())?,
            fname: input.fname,
            lname: input.lname,
            email: input.email,
            custom: input.custom.unwrap_or_else(|| json!({})),
            meta: Metadata::new(Some(&user.username)),
        };
        store.create_user(&new_user)?;
        created.push(new_user);
    }

    if let Some(mut default_org) = store.get_org(DEFAULT_ORG)? {
        for new_user in &created {
            default_org
                .permissions
                .grant(new_user.username.clone(), Role::Write);
        }
        default_org.meta.touch(&user.username);
        store.update_org(&default_org)?;
    }

    tracing::info!(count = created.len(), by = %user.username, "created users");
    emit(state, "users-created", "", &created);
    Ok(created)
}

pub fn find_users(
    state: &AppState,
    user: &User,
    usernames: Option<&[String]>,
    include_archived: bool,
) -> Result<Vec<User>> {
    permissions::read_user(user)?;
    let users = state.store.list_users(include_archived)?;
    Ok(filter_ids(users, usernames, |u| &u.username))
}

pub fn find_user(state: &AppState, user: &User, username: &str, include_archived: bool) -> Result<User> {
    permissions::read_user(user)?;
    state
        .store
        .get_user(username)?
        .filter(|found| include_archived || !found.meta.archived)
        .ok_or_else(|| Error::not_found(format!("User [{username}]")))
}

/// The authenticated user's own record.
pub fn whoami(user: &User) -> User {
    user.clone()
}

pub fn update_users(state: &AppState, user: &User, inputs: Vec<UserRequest>) -> Result<Vec<User>> {
    let store = state.store.as_ref();
    ensure_distinct(inputs.iter().filter_map(|i| i.username.as_deref()), "User")?;

    let mut targets = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let username = required(input.username.as_deref(), "username")?;
        let target = store
            .get_user(username)?
            .ok_or_else(|| Error::not_found(format!("User [{username}]")))?;
        permissions::update_user(user, &target)?;

        if input.password.is_some() {
            return Err(Error::validation(
                "password",
                "must be changed through the password endpoint",
            ));
        }
        if input.admin.is_some_and(|a| a != target.admin) && !user.admin {
            return Err(Error::Permission(permissions::PermissionError::new(
                "User does not have permission to change admin status.",
            )));
        }
        if input.archived.is_some_and(|a| a != target.meta.archived) && !user.admin {
            return Err(Error::Permission(permissions::PermissionError::new(
                "User does not have permission to archive users.",
            )));
        }
        if input.archived == Some(true) && target.username == user.username {
            return Err(Error::BadRequest("User cannot archive themselves.".to_string()));
        }
        check_profile(input)?;
        targets.push(target);
    }

    let mut updated = Vec::with_capacity(targets.len());
    for (input, mut target) in inputs.into_iter().zip(targets) {
        if let Some(fname) = input.fname {
            target.fname = Some(fname);
        }
        if let Some(lname) = input.lname {
            target.lname = Some(lname);
        }
        if let Some(email) = input.email {
            target.email = Some(email);
        }
        if let Some(custom) = input.custom {
            target.custom = custom;
        }
        if let Some(admin) = input.admin {
            target.admin = admin;
        }
        if let Some(archived) = input.archived {
            target.meta.set_archived(archived, &user.username);
        }
        target.meta.touch(&user.username);
        store.update_user(&target)?;
        updated.push(target);
    }

    emit(state, "users-updated", "", &updated);
    Ok(updated)
}

pub fn update_user(state: &AppState, user: &User, username: &str, mut input: UserRequest) -> Result<User> {
    ensure_unchanged("User", "username", username, input.username.as_deref())?;
    input.username = Some(username.to_string());
    let mut updated = update_users(state, user, vec![input])?;
    updated
        .pop()
        .ok_or_else(|| Error::not_found(format!("User [{username}]")))
}

/// Changes a user's own password after checking the old one.
pub fn update_password(
    state: &AppState,
    user: &User,
    username: &str,
    request: PasswordRequest,
) -> Result<User> {
    if user.username != username {
        return Err(Error::Permission(permissions::PermissionError::new(
            "User can only change their own password.",
        )));
    }
    if !verify_password(&request.old_password, &user.password_hash)? {
        return Err(Error::Unauthorized);
    }
    if request.password != request.confirm_password {
        return Err(Error::validation("password", "passwords do not match"));
    }
    validate_password(&request.password)?;

    let mut target = user.clone();
    target.password_hash = hash_password(&request.password)?;
    target.meta.touch(&user.username);
    state.store.update_user(&target)?;

    tracing::info!(user = %username, "password changed");
    Ok(target)
}

/// Deletes users and removes them from every permissions map.
pub fn delete_users(state: &AppState, user: &User, usernames: &[String]) -> Result<Vec<String>> {
    permissions::delete_user(user)?;
    let store = state.store.as_ref();

    for username in usernames {
        if username == &user.username {
            return Err(Error::BadRequest("User cannot delete themselves.".to_string()));
        }
        if store.get_user(username)?.is_none() {
            return Err(Error::not_found(format!("User [{username}]")));
        }
    }

    for mut org in store.list_orgs(true)? {
        let mut changed = false;
        for username in usernames {
            changed |= org.permissions.revoke(username);
        }
        if changed {
            org.meta.touch(&user.username);
            store.update_org(&org)?;
        }
    }
    for mut project in store.list_all_projects(true)? {
        let mut changed = false;
        for username in usernames {
            changed |= project.permissions.revoke(username);
        }
        if changed {
            project.meta.touch(&user.username);
            store.update_project(&project)?;
        }
    }

    let mut deleted = Vec::with_capacity(usernames.len());
    for username in usernames {
        if store.delete_user(username)? {
            deleted.push(username.clone());
        }
    }

    tracing::info!(count = deleted.len(), by = %user.username, "deleted users");
    emit(state, "users-deleted", "", &deleted);
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::Fixture;

    fn request(username: &str) -> UserRequest {
        UserRequest {
            username: Some(username.to_string()),
            password: Some("abcdefg1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_users_joins_default_org() {
        let fx = Fixture::new();
        let created = create_users(&fx.state, &fx.admin, vec![request("alice")]).unwrap();
        assert_eq!(created[0].username, "alice");
        assert!(verify_password("abcdefg1", &created[0].password_hash).unwrap());

        let org = fx.store().get_org(DEFAULT_ORG).unwrap().unwrap();
        assert_eq!(org.permissions.roles("alice"), &[Role::Read, Role::Write]);
    }

    #[test]
    fn test_create_users_is_admin_only_and_atomic() {
        let fx = Fixture::new();
        let alice = fx.add_user("alice");
        assert!(matches!(
            create_users(&fx.state, &alice, vec![request("bob")]),
            Err(Error::Permission(_))
        ));

        let mut bad = request("carol");
        bad.password = Some("short".to_string());
        assert!(create_users(&fx.state, &fx.admin, vec![request("dave"), bad]).is_err());
        assert!(fx.store().get_user("dave").unwrap().is_none());

        assert!(matches!(
            create_users(&fx.state, &fx.admin, vec![request("alice")]),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_update_user_self_only() {
        let fx = Fixture::new();
        let alice = fx.add_user("alice");
        fx.add_user("bob");

        let input = UserRequest {
            fname: Some("Alice".to_string()),
            ..Default::default()
        };
        let updated = update_user(&fx.state, &alice, "alice", input.clone()).unwrap();
        assert_eq!(updated.fname.as_deref(), Some("Alice"));
        assert_eq!(updated.meta.last_modified_by.as_deref(), Some("alice"));

        assert!(matches!(
            update_user(&fx.state, &alice, "bob", input),
            Err(Error::Permission(_))
        ));

        let promote = UserRequest {
            admin: Some(true),
            ..Default::default()
        };
        assert!(update_user(&fx.state, &alice, "alice", promote.clone()).is_err());
        assert!(update_user(&fx.state, &fx.admin, "alice", promote).unwrap().admin);
    }

    #[test]
    fn test_update_password() {
        let fx = Fixture::new();
        let alice = fx.add_user("alice");

        let wrong_old = PasswordRequest {
            old_password: "nope".to_string(),
            password: "newpass12".to_string(),
            confirm_password: "newpass12".to_string(),
        };
        assert!(matches!(
            update_password(&fx.state, &alice, "alice", wrong_old),
            Err(Error::Unauthorized)
        ));

        let ok = PasswordRequest {
            old_password: "password1".to_string(),
            password: "newpass12".to_string(),
            confirm_password: "newpass12".to_string(),
        };
        update_password(&fx.state, &alice, "alice", ok).unwrap();
        let stored = fx.store().get_user("alice").unwrap().unwrap();
        assert!(verify_password("newpass12", &stored.password_hash).unwrap());
    }

    #[test]
    fn test_delete_users_scrubs_permissions() {
        let fx = Fixture::new();
        create_users(&fx.state, &fx.admin, vec![request("alice")]).unwrap();

        let deleted = delete_users(&fx.state, &fx.admin, &["alice".to_string()]).unwrap();
        assert_eq!(deleted, vec!["alice"]);
        let org = fx.store().get_org(DEFAULT_ORG).unwrap().unwrap();
        assert!(!org.permissions.contains_user("alice"));

        assert!(delete_users(&fx.state, &fx.admin, &["root".to_string()]).is_err());
    }

    #[test]
    fn test_find_users_skips_archived() {
        let fx = Fixture::new();
        fx.add_user("alice");
        let archive = UserRequest {
            archived: Some(true),
            ..Default::default()
        };
        update_user(&fx.state, &fx.admin, "alice", archive).unwrap();

        let active = find_users(&fx.state, &fx.admin, None, false).unwrap();
        assert!(active.iter().all(|u| u.username != "alice"));
        let all = find_users(&fx.state, &fx.admin, None, true).unwrap();
        assert!(all.iter().any(|u| u.username == "alice"));
        assert!(find_user(&fx.state, &fx.admin, "alice", false).is_err());
    }
}
