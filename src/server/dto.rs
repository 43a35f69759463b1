use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{PermissionChange, Visibility, WebhookType};

/// Request body that accepts either a single object or an array of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Permission changes keyed by username.
pub type PermissionUpdates = BTreeMap<String, PermissionChange>;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Include archived records.
    #[serde(default)]
    pub archived: bool,
    /// Comma-separated ids to restrict the result to.
    #[serde(default)]
    pub ids: Option<String>,
}

impl ListParams {
    pub fn id_filter(&self) -> Option<Vec<String>> {
        self.ids.as_ref().map(|ids| {
            ids.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ArchivedParam {
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlobParams {
    #[serde(default)]
    pub location: String,
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct UserRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub fname: Option<String>,
    #[serde(default)]
    pub lname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub admin: Option<bool>,
    #[serde(default)]
    pub custom: Option<Value>,
    #[serde(default)]
    pub archived: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordRequest {
    #[serde(rename = "oldPassword", alias = "old_password")]
    pub old_password: String,
    pub password: String,
    #[serde(rename = "confirmPassword", alias = "confirm_password")]
    pub confirm_password: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct OrgRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permissions: Option<PermissionUpdates>,
    #[serde(default)]
    pub custom: Option<Value>,
    #[serde(default)]
    pub archived: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProjectRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permissions: Option<PermissionUpdates>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub custom: Option<Value>,
    #[serde(default)]
    pub archived: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct BranchRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Leaf id of the branch to copy elements from; defaults to master.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tag: Option<bool>,
    #[serde(default)]
    pub custom: Option<Value>,
    #[serde(default)]
    pub archived: Option<bool>,
}

/// Location of a relationship end in another project of the same org.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Namespace {
    pub org: String,
    pub project: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ElementRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub element_type: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    /// Leaf id of the parent element in the same branch.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub source_namespace: Option<Namespace>,
    #[serde(default)]
    pub target_namespace: Option<Namespace>,
    #[serde(default)]
    pub custom: Option<Value>,
    #[serde(default)]
    pub archived: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ArtifactRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub custom: Option<Value>,
    #[serde(default)]
    pub archived: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct WebhookRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub webhook_type: Option<WebhookType>,
    /// Scope id; empty or absent for server-wide webhooks.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub triggers: Option<Vec<String>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_location: Option<String>,
    #[serde(default)]
    pub custom: Option<Value>,
    #[serde(default)]
    pub archived: Option<bool>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_one_or_many() {
        let one: OneOrMany<OrgRequest> = serde_json::from_value(json!({"id": "acme"})).unwrap();
        assert_eq!(one.into_vec().len(), 1);

        let many: OneOrMany<OrgRequest> =
            serde_json::from_value(json!([{"id": "a1"}, {"id": "b2"}])).unwrap();
        let ids: Vec<_> = many.into_vec().into_iter().filter_map(|o| o.id).collect();
        assert_eq!(ids, vec!["a1", "b2"]);
    }

    #[test]
    fn test_permission_updates() {
        let req: OrgRequest = serde_json::from_value(json!({
            "id": "acme",
            "permissions": {"alice": "write", "bob": "remove_all"}
        }))
        .unwrap();
        let perms = req.permissions.unwrap();
        assert_eq!(perms["alice"], PermissionChange::Write);
        assert_eq!(perms["bob"], PermissionChange::RemoveAll);

        let bad: Result<OrgRequest, _> =
            serde_json::from_value(json!({"permissions": {"alice": "owner"}}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_id_filter() {
        let params = ListParams {
            archived: false,
            ids: Some("a, b,,c".to_string()),
        };
        assert_eq!(params.id_filter().unwrap(), vec!["a", "b", "c"]);
        assert!(ListParams::default().id_filter().is_none());
    }
}
