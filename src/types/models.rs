use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Permissions;

/// Bookkeeping fields shared by every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_by: Option<String>,
}

impl Metadata {
    #[must_use]
    pub fn new(by: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            created_on: now,
            updated_on: now,
            created_by: by.map(str::to_string),
            last_modified_by: by.map(str::to_string),
            archived: false,
            archived_on: None,
            archived_by: None,
        }
    }

    pub fn touch(&mut self, by: &str) {
        self.updated_on = Utc::now();
        self.last_modified_by = Some(by.to_string());
    }

    /// Sets or clears the archived state, recording who did it.
    pub fn set_archived(&mut self, archived: bool, by: &str) {
        if archived == self.archived {
            return;
        }
        self.archived = archived;
        if archived {
            self.archived_on = Some(Utc::now());
            self.archived_by = Some(by.to_string());
        } else {
            self.archived_on = None;
            self.archived_by = None;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub admin: bool,
    #[serde(skip)]
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub custom: Value,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    pub id: String,
    pub name: String,
    pub permissions: Permissions,
    pub custom: Value,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Internal,
}

impl Visibility {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Visibility> {
        match s {
            "private" => Some(Visibility::Private),
            "internal" => Some(Visibility::Internal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Composite id `org:project`.
    pub id: String,
    pub org: String,
    pub name: String,
    pub permissions: Permissions,
    pub visibility: Visibility,
    pub custom: Value,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    /// Composite id `org:project:branch`.
    pub id: String,
    pub project: String,
    pub name: String,
    /// Branch this one was created from; `None` only for master.
    pub source: Option<String>,
    pub tag: bool,
    pub custom: Value,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    /// Composite id `org:project:branch:element`.
    pub id: String,
    pub project: String,
    pub branch: String,
    pub name: String,
    #[serde(rename = "type")]
    pub element_type: String,
    pub documentation: String,
    pub parent: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub custom: Value,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookType {
    Outgoing,
    Incoming,
}

impl WebhookType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            WebhookType::Outgoing => "Outgoing",
            WebhookType::Incoming => "Incoming",
        }
    }

    pub fn parse(s: &str) -> Option<WebhookType> {
        match s {
            "Outgoing" => Some(WebhookType::Outgoing),
            "Incoming" => Some(WebhookType::Incoming),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub webhook_type: WebhookType,
    /// Scope id: empty for server-wide, otherwise an org, project or branch id.
    pub reference: String,
    pub triggers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip)]
    pub token_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_location: Option<String>,
    pub custom: Value,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Composite id `org:project:branch:artifact`.
    pub id: String,
    pub project: String,
    pub branch: String,
    pub name: String,
    pub location: String,
    pub filename: String,
    pub strategy: String,
    pub size: i64,
    pub custom: Value,
    #[serde(flatten)]
    pub meta: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Blob listing entry returned by the artifact strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub location: String,
    pub filename: String,
    pub size: u64,
}
