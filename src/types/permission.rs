use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A role a user holds on an org or project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Read,
    Write,
    Admin,
}

impl Role {
    /// Returns the role together with every role it implies.
    /// admin implies write implies read.
    #[must_use]
    pub fn expand_implied(self) -> Vec<Role> {
        match self {
            Role::Read => vec![Role::Read],
            Role::Write => vec![Role::Read, Role::Write],
            Role::Admin => vec![Role::Read, Role::Write, Role::Admin],
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "read" => Some(Role::Read),
            "write" => Some(Role::Write),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Read => "read",
            Role::Write => "write",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permissions map keyed by username.
///
/// The stored role lists are cascaded on write ([`Permissions::grant`]), so a
/// membership test against a single role is enough at read time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeMap<String, Vec<Role>>);

impl Permissions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the user has any entry in the map.
    #[must_use]
    pub fn contains_user(&self, username: &str) -> bool {
        self.0.contains_key(username)
    }

    /// Returns true if the user's role list contains `role`.
    #[must_use]
    pub fn has(&self, username: &str, role: Role) -> bool {
        self.0
            .get(username)
            .is_some_and(|roles| roles.contains(&role))
    }

    #[must_use]
    pub fn roles(&self, username: &str) -> &[Role] {
        self.0.get(username).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replaces the user's roles with `role` and every role it implies.
    pub fn grant(&mut self, username: impl Into<String>, role: Role) {
        self.0.insert(username.into(), role.expand_implied());
    }

    /// Removes the user entirely. Returns true if an entry was removed.
    pub fn revoke(&mut self, username: &str) -> bool {
        self.0.remove(username).is_some()
    }

    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[(&str, Role); N]> for Permissions {
    fn from(entries: [(&str, Role); N]) -> Self {
        let mut permissions = Permissions::new();
        for (username, role) in entries {
            permissions.grant(username, role);
        }
        permissions
    }
}

/// A single entry of a permissions update request: a role to grant
/// (cascading) or `remove_all` to drop the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionChange {
    Read,
    Write,
    Admin,
    RemoveAll,
}

impl PermissionChange {
    #[must_use]
    pub const fn role(self) -> Option<Role> {
        match self {
            PermissionChange::Read => Some(Role::Read),
            PermissionChange::Write => Some(Role::Write),
            PermissionChange::Admin => Some(Role::Admin),
            PermissionChange::RemoveAll => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_implied() {
        assert_eq!(
            Role::Admin.expand_implied(),
            vec![Role::Read, Role::Write, Role::Admin]
        );
        assert_eq!(Role::Write.expand_implied(), vec![Role::Read, Role::Write]);
        assert_eq!(Role::Read.expand_implied(), vec![Role::Read]);
    }

    #[test]
    fn test_grant_cascades() {
        let mut perms = Permissions::new();
        perms.grant("alice", Role::Write);
        assert!(perms.has("alice", Role::Read));
        assert!(perms.has("alice", Role::Write));
        assert!(!perms.has("alice", Role::Admin));
        assert!(!perms.has("bob", Role::Read));
    }

    #[test]
    fn test_grant_downgrades() {
        let mut perms = Permissions::from([("alice", Role::Admin)]);
        perms.grant("alice", Role::Read);
        assert_eq!(perms.roles("alice"), &[Role::Read]);
    }

    #[test]
    fn test_revoke() {
        let mut perms = Permissions::from([("alice", Role::Read)]);
        assert!(perms.revoke("alice"));
        assert!(!perms.contains_user("alice"));
        assert!(!perms.revoke("alice"));
    }

    #[test]
    fn test_serializes_as_map() {
        let perms = Permissions::from([("alice", Role::Write)]);
        let json = serde_json::to_value(&perms).unwrap();
        assert_eq!(json, serde_json::json!({"alice": ["read", "write"]}));
    }

    #[test]
    fn test_parse_role() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("owner"), None);
    }
}
