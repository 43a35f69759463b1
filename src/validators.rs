//! Field validation rules applied before anything is written.

use std::fmt::Display;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::id::ID_DELIMITER;

const MAX_ID_LEN: usize = 36;
const MIN_ID_LEN: usize = 2;
const MIN_USERNAME_LEN: usize = 3;
const MAX_NAME_LEN: usize = 256;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_TRIGGER_LEN: usize = 64;

/// Ids of the elements created with every branch. They may be read and
/// updated but never created or deleted through the API.
pub const ROOT_ELEMENT_IDS: [&str; 4] = ["model", "__mbee__", "holding_bin", "undefined"];

/// Org ids that collide with API and UI routes.
const RESERVED_ORG_IDS: &[&str] = &[
    "about", "admin", "api", "artifacts", "assets", "branches", "css", "docs", "elements", "img",
    "js", "login", "logout", "null", "orgs", "organizations", "plugins", "projects", "public",
    "search", "static", "undefined", "users", "webhooks", "whoami",
];

static LOWER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][-_a-z0-9]*$").expect("static regex"));
static ELEMENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_][-_a-zA-Z0-9]*$").expect("static regex"));
static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static regex"));
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@<>()\[\],;:]+@[a-zA-Z0-9-]+(\.[a-zA-Z0-9-]+)*\.[a-zA-Z]{2,}$")
        .expect("static regex")
});
static PERSON_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z][-a-zA-Z ]*)?$").expect("static regex"));
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[a-zA-Z0-9.-]+(:[0-9]{1,5})?(/\S*)?$").expect("static regex")
});
static TRIGGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][-a-z]*$").expect("static regex"));

fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<()> {
    if value.len() < min || value.len() > max {
        return Err(Error::validation(
            field,
            format!("must be between {min} and {max} characters"),
        ));
    }
    Ok(())
}

fn check_segment(field: &str, value: &str, pattern: &Regex, min: usize) -> Result<()> {
    if value.contains(ID_DELIMITER) {
        return Err(Error::validation(
            field,
            format!("[{value}] cannot contain '{ID_DELIMITER}'"),
        ));
    }
    check_length(field, value, min, MAX_ID_LEN)?;
    if !pattern.is_match(value) {
        return Err(Error::validation(
            field,
            format!("[{value}] contains invalid characters"),
        ));
    }
    Ok(())
}

pub fn validate_org_id(id: &str) -> Result<()> {
    check_segment("org id", id, &LOWER_ID, MIN_ID_LEN)?;
    if RESERVED_ORG_IDS.contains(&id) {
        return Err(Error::validation("org id", format!("[{id}] is reserved")));
    }
    Ok(())
}

pub fn validate_project_id(id: &str) -> Result<()> {
    check_segment("project id", id, &LOWER_ID, MIN_ID_LEN)
}

pub fn validate_branch_id(id: &str) -> Result<()> {
    check_segment("branch id", id, &LOWER_ID, MIN_ID_LEN)
}

/// Validates a user-supplied element id. Root element ids are rejected.
pub fn validate_element_id(id: &str) -> Result<()> {
    check_segment("element id", id, &ELEMENT_ID, 1)?;
    if ROOT_ELEMENT_IDS.contains(&id) {
        return Err(Error::validation(
            "element id",
            format!("[{id}] is reserved"),
        ));
    }
    Ok(())
}

pub fn validate_artifact_id(id: &str) -> Result<()> {
    check_segment("artifact id", id, &ELEMENT_ID, 1)
}

/// Client-chosen webhook ids share the element alphabet, so generated uuids pass.
pub fn validate_webhook_id(id: &str) -> Result<()> {
    check_segment("webhook id", id, &ELEMENT_ID, 1)
}

pub fn validate_username(username: &str) -> Result<()> {
    check_length("username", username, MIN_USERNAME_LEN, MAX_ID_LEN)?;
    if !USERNAME.is_match(username) {
        return Err(Error::validation(
            "username",
            "must start with a lowercase letter and contain only lowercase letters, digits and underscores",
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<()> {
    if !EMAIL.is_match(email) {
        return Err(Error::validation("email", format!("[{email}] is not an email address")));
    }
    Ok(())
}

/// Validates `fname` / `lname`.
pub fn validate_person_name(field: &str, value: &str) -> Result<()> {
    check_length(field, value, 0, MAX_NAME_LEN)?;
    if !PERSON_NAME.is_match(value) {
        return Err(Error::validation(field, "may only contain letters, spaces and hyphens"));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(Error::validation(
            "password",
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_letter = password.chars().any(char::is_alphabetic);
    if !has_digit || !has_letter {
        return Err(Error::validation(
            "password",
            "must contain at least one letter and one digit",
        ));
    }
    Ok(())
}

/// Validates a display name field.
pub fn validate_name(field: &str, name: &str) -> Result<()> {
    check_length(field, name, 0, MAX_NAME_LEN)
}

pub fn validate_custom(custom: &Value) -> Result<()> {
    if !custom.is_object() {
        return Err(Error::validation("custom", "must be a JSON object"));
    }
    Ok(())
}

pub fn validate_url(url: &str) -> Result<()> {
    if !URL.is_match(url) {
        return Err(Error::validation("url", format!("[{url}] is not an http(s) url")));
    }
    Ok(())
}

pub fn validate_triggers(triggers: &[String]) -> Result<()> {
    if triggers.is_empty() {
        return Err(Error::validation("triggers", "at least one trigger is required"));
    }
    for trigger in triggers {
        if trigger.len() > MAX_TRIGGER_LEN || !TRIGGER.is_match(trigger) {
            return Err(Error::validation(
                "triggers",
                format!("[{trigger}] is not a valid event name"),
            ));
        }
    }
    Ok(())
}

/// Validates a dot-separated path into a JSON body, e.g. `auth.token`.
pub fn validate_token_location(location: &str) -> Result<()> {
    if location.is_empty() || location.split('.').any(str::is_empty) {
        return Err(Error::validation(
            "token_location",
            "must be a dot-separated path of non-empty keys",
        ));
    }
    Ok(())
}

/// Validates an artifact location: a relative `/`-separated directory path.
/// An empty location places the blob at the project root.
pub fn validate_location(location: &str) -> Result<()> {
    if location.is_empty() {
        return Ok(());
    }
    if location.starts_with('/') || location.contains('\\') {
        return Err(Error::validation("location", "must be a relative path"));
    }
    for segment in location.trim_end_matches('/').split('/') {
        check_path_segment("location", segment)?;
    }
    Ok(())
}

pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.contains('/') || filename.contains('\\') {
        return Err(Error::validation("filename", "cannot contain path separators"));
    }
    check_path_segment("filename", filename)
}

fn check_path_segment(field: &str, segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(Error::validation(
            field,
            format!("[{segment}] is not a valid path segment"),
        ));
    }
    check_length(field, segment, 1, 255)?;
    const INVALID_CHARS: &[char] = &['\0', '\n', '\r', ':'];
    if segment.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(Error::validation(field, "contains invalid characters"));
    }
    Ok(())
}

/// Rejects a request that tries to change an immutable field.
pub fn ensure_unchanged<T>(entity: &str, field: &str, current: &T, requested: Option<&T>) -> Result<()>
where
    T: PartialEq + Display + ?Sized,
{
    match requested {
        Some(value) if value != current => Err(Error::validation(
            field,
            format!("{entity} field [{field}] cannot be changed from [{current}] to [{value}]"),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_org_id() {
        assert!(validate_org_id("acme").is_ok());
        assert!(validate_org_id("acme-corp_2").is_ok());
        assert!(validate_org_id("Acme").is_err());
        assert!(validate_org_id("-acme").is_err());
        assert!(validate_org_id("a").is_err());
        assert!(validate_org_id("ac:me").is_err());
        assert!(validate_org_id(&"a".repeat(37)).is_err());
        assert!(validate_org_id("api").is_err());
    }

    #[test]
    fn test_element_id() {
        assert!(validate_element_id("Engine_1").is_ok());
        assert!(validate_element_id("e").is_ok());
        assert!(validate_element_id("model").is_err());
        assert!(validate_element_id("holding_bin").is_err());
        assert!(validate_element_id("a:b").is_err());
        assert!(validate_element_id("").is_err());
    }

    #[test]
    fn test_webhook_id() {
        assert!(validate_webhook_id("3f0c7a52-0e7e-4a1b-9d59-8f8c1f3b2a10").is_ok());
        assert!(validate_webhook_id("ci-notify").is_ok());
        assert!(validate_webhook_id("has space").is_err());
        assert!(validate_webhook_id(&"x".repeat(37)).is_err());
    }

    #[test]
    fn test_username() {
        assert!(validate_username("alice_1").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username("1alice").is_err());
        assert!(validate_username("Alice").is_err());
    }

    #[test]
    fn test_email_and_names() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("alice@example").is_err());
        assert!(validate_person_name("fname", "Mary-Jane").is_ok());
        assert!(validate_person_name("fname", "").is_ok());
        assert!(validate_person_name("fname", "R2D2").is_err());
    }

    #[test]
    fn test_password() {
        assert!(validate_password("abcdefg1").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("abcdefgh").is_err());
    }

    #[test]
    fn test_custom_must_be_object() {
        assert!(validate_custom(&json!({"a": 1})).is_ok());
        assert!(validate_custom(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_url_and_triggers() {
        assert!(validate_url("https://hooks.example.com/mbee").is_ok());
        assert!(validate_url("http://localhost:9000").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_triggers(&["elements-created".to_string()]).is_ok());
        assert!(validate_triggers(&[]).is_err());
        assert!(validate_triggers(&["Bad Trigger".to_string()]).is_err());
    }

    #[test]
    fn test_location_and_filename() {
        assert!(validate_location("").is_ok());
        assert!(validate_location("models/v1").is_ok());
        assert!(validate_location("models/v1/").is_ok());
        assert!(validate_location("/etc").is_err());
        assert!(validate_location("models/../secrets").is_err());
        assert!(validate_filename("model.xmi").is_ok());
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename("..").is_err());
    }

    #[test]
    fn test_token_location() {
        assert!(validate_token_location("token").is_ok());
        assert!(validate_token_location("auth.token").is_ok());
        assert!(validate_token_location("auth..token").is_err());
        assert!(validate_token_location("").is_err());
    }

    #[test]
    fn test_ensure_unchanged() {
        assert!(ensure_unchanged("Project", "org", "acme", None).is_ok());
        assert!(ensure_unchanged("Project", "org", "acme", Some("acme")).is_ok());
        let err = ensure_unchanged("Project", "org", "acme", Some("other")).unwrap_err();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "org"));
    }
}
