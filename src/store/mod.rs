mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface.
///
/// List operations skip archived records unless `include_archived` is set.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, username: &str) -> Result<Option<User>>;
    fn list_users(&self, include_archived: bool) -> Result<Vec<User>>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn delete_user(&self, username: &str) -> Result<bool>;
    fn has_admin_user(&self) -> Result<bool>;

    // Token operations
    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn update_token_last_used(&self, id: &str) -> Result<()>;
    fn delete_token(&self, id: &str) -> Result<bool>;

    // Org operations
    fn create_org(&self, org: &Org) -> Result<()>;
    fn get_org(&self, id: &str) -> Result<Option<Org>>;
    fn list_orgs(&self, include_archived: bool) -> Result<Vec<Org>>;
    fn update_org(&self, org: &Org) -> Result<()>;
    fn delete_org(&self, id: &str) -> Result<bool>;

    // Project operations
    fn create_project(&self, project: &Project) -> Result<()>;
    fn get_project(&self, id: &str) -> Result<Option<Project>>;
    fn list_projects(&self, org: &str, include_archived: bool) -> Result<Vec<Project>>;
    fn list_all_projects(&self, include_archived: bool) -> Result<Vec<Project>>;
    fn update_project(&self, project: &Project) -> Result<()>;
    fn delete_project(&self, id: &str) -> Result<bool>;

    // Branch operations
    fn create_branch(&self, branch: &Branch) -> Result<()>;
    fn get_branch(&self, id: &str) -> Result<Option<Branch>>;
    fn list_branches(&self, project: &str, include_archived: bool) -> Result<Vec<Branch>>;
    fn update_branch(&self, branch: &Branch) -> Result<()>;
    fn delete_branch(&self, id: &str) -> Result<bool>;

    // Element operations
    /// Inserts all elements in one transaction.
    fn create_elements(&self, elements: &[Element]) -> Result<()>;
    fn get_element(&self, id: &str) -> Result<Option<Element>>;
    fn list_elements(&self, branch: &str, include_archived: bool) -> Result<Vec<Element>>;
    fn list_children(&self, parent: &str, include_archived: bool) -> Result<Vec<String>>;
    /// Returns `id` and the ids of all of its descendants.
    fn element_subtree(&self, id: &str) -> Result<Vec<String>>;
    fn update_element(&self, element: &Element) -> Result<()>;
    /// Deletes the given elements, re-pointing any relationship whose source
    /// or target is among them to `placeholder`. Returns the number deleted.
    fn delete_elements(&self, ids: &[String], placeholder: &str) -> Result<usize>;

    // Artifact operations
    fn create_artifact(&self, artifact: &Artifact) -> Result<()>;
    fn get_artifact(&self, id: &str) -> Result<Option<Artifact>>;
    fn list_artifacts(&self, branch: &str, include_archived: bool) -> Result<Vec<Artifact>>;
    fn update_artifact(&self, artifact: &Artifact) -> Result<()>;
    fn delete_artifact(&self, id: &str) -> Result<bool>;

    // Webhook operations
    fn create_webhook(&self, webhook: &Webhook) -> Result<()>;
    fn get_webhook(&self, id: &str) -> Result<Option<Webhook>>;
    fn list_webhooks(&self, include_archived: bool) -> Result<Vec<Webhook>>;
    fn update_webhook(&self, webhook: &Webhook) -> Result<()>;
    fn delete_webhook(&self, id: &str) -> Result<bool>;
    /// Deletes webhooks referencing `scope` or anything inside it.
    fn delete_webhooks_in_scope(&self, scope: &str) -> Result<usize>;

    fn close(&self) -> Result<()>;
}
