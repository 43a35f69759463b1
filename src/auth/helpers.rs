use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;

use super::password::verify_password;
use super::{TokenGenerator, parse_token};
use crate::server::AppState;
use crate::types::User;

#[derive(Debug)]
pub enum AuthFailure {
    InvalidScheme,
    InvalidCredentials,
    TokenExpired,
    Archived,
    InternalError,
}

/// Credentials carried by an `Authorization` header.
#[derive(Debug, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
}

/// Parses a Basic auth header of the form `Basic base64(username:password)`.
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (username, password) = credentials.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Extracts credentials from the Authorization header.
/// Returns None if no auth header is present.
/// Returns Err if the header is malformed or the scheme is unsupported.
pub fn extract_credentials(auth_header: Option<&str>) -> Result<Option<Credentials>, AuthFailure> {
    match auth_header {
        Some(header) if header.starts_with("Bearer ") => Ok(header
            .strip_prefix("Bearer ")
            .map(|token| Credentials::Bearer(token.trim().to_string()))),
        Some(header) if header.starts_with("Basic ") => parse_basic_auth(header)
            .map(|(username, password)| Some(Credentials::Basic { username, password }))
            .ok_or(AuthFailure::InvalidCredentials),
        Some(_) => Err(AuthFailure::InvalidScheme),
        None => Ok(None),
    }
}

fn active_user(state: &AppState, username: &str) -> Result<User, AuthFailure> {
    let user = state
        .store
        .get_user(username)
        .map_err(|_| AuthFailure::InternalError)?
        .ok_or(AuthFailure::InvalidCredentials)?;

    if user.meta.archived {
        return Err(AuthFailure::Archived);
    }
    Ok(user)
}

/// Checks a username and password against the store.
pub fn authenticate_password(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<User, AuthFailure> {
    let user = active_user(state, username)?;

    if !verify_password(password, &user.password_hash).map_err(|_| AuthFailure::InternalError)? {
        return Err(AuthFailure::InvalidCredentials);
    }
    Ok(user)
}

/// Validates a raw session token and returns the user it belongs to.
pub fn authenticate_token(state: &AppState, raw_token: &str) -> Result<User, AuthFailure> {
    let (lookup, _secret) =
        parse_token(raw_token).map_err(|_| AuthFailure::InvalidCredentials)?;

    let token = state
        .store
        .get_token_by_lookup(&lookup)
        .map_err(|_| AuthFailure::InternalError)?
        .ok_or(AuthFailure::InvalidCredentials)?;

    let generator = TokenGenerator::new();
    if !generator
        .verify(raw_token, &token.token_hash)
        .map_err(|_| AuthFailure::InternalError)?
    {
        return Err(AuthFailure::InvalidCredentials);
    }

    if let Some(expires_at) = &token.expires_at {
        if expires_at < &Utc::now() {
            return Err(AuthFailure::TokenExpired);
        }
    }

    let user = active_user(state, &token.username)?;

    if let Err(e) = state.store.update_token_last_used(&token.id) {
        tracing::warn!("Failed to update token last_used_at: {e}");
    }

    Ok(user)
}

pub fn authenticate(state: &AppState, credentials: &Credentials) -> Result<User, AuthFailure> {
    match credentials {
        Credentials::Basic { username, password } => {
            authenticate_password(state, username, password)
        }
        Credentials::Bearer(token) => authenticate_token(state, token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_basic() {
        let header = format!("Basic {}", STANDARD.encode("alice:s3cret:pw"));
        let credentials = extract_credentials(Some(&header)).unwrap().unwrap();
        assert_eq!(
            credentials,
            Credentials::Basic {
                username: "alice".to_string(),
                password: "s3cret:pw".to_string(),
            }
        );
    }

    #[test]
    fn test_extract_bearer() {
        let credentials = extract_credentials(Some("Bearer mbee_abc_def")).unwrap().unwrap();
        assert_eq!(credentials, Credentials::Bearer("mbee_abc_def".to_string()));
    }

    #[test]
    fn test_extract_rejects_other_schemes() {
        assert!(matches!(
            extract_credentials(Some("Digest abc")),
            Err(AuthFailure::InvalidScheme)
        ));
        assert!(matches!(
            extract_credentials(Some("Basic !!!")),
            Err(AuthFailure::InvalidCredentials)
        ));
        assert!(extract_credentials(None).unwrap().is_none());
    }
}
