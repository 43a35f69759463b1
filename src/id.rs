//! Composite identifiers.
//!
//! Every org, project, branch, element and artifact is keyed by the
//! colon-joined ids of its ancestors, e.g. `acme:rocket:master:engine`.
//! Segments never contain the delimiter; the validators reject such ids
//! before they reach [`create_id`].

pub const ID_DELIMITER: char = ':';

/// Joins segments into a composite id.
#[must_use]
pub fn create_id<S: AsRef<str>>(segments: &[S]) -> String {
    let mut id = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            id.push(ID_DELIMITER);
        }
        id.push_str(segment.as_ref());
    }
    id
}

/// Splits a composite id into its ordered segments.
#[must_use]
pub fn parse_id(id: &str) -> Vec<String> {
    id.split(ID_DELIMITER).map(str::to_string).collect()
}

/// Returns the last segment of a composite id.
#[must_use]
pub fn leaf(id: &str) -> &str {
    id.rsplit(ID_DELIMITER).next().unwrap_or(id)
}

/// Returns the id of the enclosing scope, or `None` for a top-level id.
#[must_use]
pub fn parent_id(id: &str) -> Option<&str> {
    id.rsplit_once(ID_DELIMITER).map(|(parent, _)| parent)
}

/// Returns true when `ancestor` is `id` itself or one of its enclosing scopes.
#[must_use]
pub fn is_within(id: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() || id == ancestor {
        return true;
    }
    id.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with(ID_DELIMITER))
}

pub fn project_id(org: &str, project: &str) -> String {
    create_id(&[org, project])
}

pub fn branch_id(org: &str, project: &str, branch: &str) -> String {
    create_id(&[org, project, branch])
}

pub fn element_id(org: &str, project: &str, branch: &str, element: &str) -> String {
    create_id(&[org, project, branch, element])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_id() {
        assert_eq!(create_id(&["org", "proj", "master"]), "org:proj:master");
        assert_eq!(create_id(&["org"]), "org");
        assert_eq!(create_id::<&str>(&[]), "");
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(
            parse_id("org:proj:master:elem"),
            vec!["org", "proj", "master", "elem"]
        );
        assert_eq!(parse_id("org"), vec!["org"]);
    }

    #[test]
    fn test_parse_inverts_create() {
        let segments = ["acme", "rocket", "dev", "engine"];
        assert_eq!(parse_id(&create_id(&segments)), segments);
    }

    #[test]
    fn test_leaf_and_parent() {
        assert_eq!(leaf("org:proj:master"), "master");
        assert_eq!(leaf("org"), "org");
        assert_eq!(parent_id("org:proj:master"), Some("org:proj"));
        assert_eq!(parent_id("org"), None);
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("org:proj:master", "org"));
        assert!(is_within("org:proj:master", "org:proj"));
        assert!(is_within("org:proj", "org:proj"));
        assert!(is_within("org:proj", ""));
        assert!(!is_within("org:project2", "org:proj"));
        assert!(!is_within("org", "org:proj"));
    }
}
