use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::Token;

const ARGON2_MEMORY: u32 = 64 * 1024; // 64KB
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

const TOKEN_PREFIX: &str = "mbee";
const LOOKUP_LENGTH: usize = 8;
const SECRET_LENGTH: usize = 24;
const SECRET_BYTES: usize = 12;
const MAX_LOOKUP_ATTEMPTS: usize = 3;

pub struct TokenGenerator {
    argon2: Argon2<'static>,
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator {
    #[must_use]
    pub fn new() -> Self {
        let params = Params::new(
            ARGON2_MEMORY,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(ARGON2_OUTPUT_LEN),
        )
        .expect("invalid argon2 params");

        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Generates a new token with the format: mbee_<lookup>_<secret>
    /// Returns (raw_token, lookup, hash)
    pub fn generate(&self) -> Result<(String, String, String)> {
        let lookup = generate_lookup();
        let secret = generate_secret();
        let raw_token = build_token(&lookup, &secret);
        let hash = self.hash(&raw_token)?;
        Ok((raw_token, lookup, hash))
    }

    /// Hashes a raw token using Argon2id
    pub fn hash(&self, token: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(token.as_bytes(), &salt)
            .map_err(|e| Error::Config(format!("failed to hash token: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verifies a raw token against a stored hash
    pub fn verify(&self, token: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::Config(format!("invalid hash format: {e}")))?;

        match self.argon2.verify_password(token.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Config(format!("failed to verify token: {e}"))),
        }
    }

    /// Issues a session token for `username` and persists it.
    /// Returns the stored token and the raw value to hand to the client.
    pub fn issue(
        &self,
        store: &dyn Store,
        username: &str,
        lifetime: Option<Duration>,
    ) -> Result<(Token, String)> {
        let now = Utc::now();
        let expires_at: Option<DateTime<Utc>> = lifetime.map(|d| now + d);

        for _ in 0..MAX_LOOKUP_ATTEMPTS {
            let (raw_token, lookup, hash) = self.generate()?;
            let token = Token {
                id: Uuid::new_v4().to_string(),
                token_hash: hash,
                token_lookup: lookup,
                username: username.to_string(),
                created_at: now,
                expires_at,
                last_used_at: None,
            };

            match store.create_token(&token) {
                Ok(()) => return Ok((token, raw_token)),
                Err(Error::TokenLookupCollision) => {
                    tracing::debug!("Token lookup collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::TokenLookupCollision)
    }
}

/// Generates the lookup portion of the token (first 8 chars of a UUID)
#[must_use]
fn generate_lookup() -> String {
    let uuid = Uuid::new_v4();
    uuid.to_string()[..LOOKUP_LENGTH].to_string()
}

/// Generates a cryptographically secure random hex string for the secret
#[must_use]
fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)[..SECRET_LENGTH].to_string()
}

#[must_use]
fn build_token(lookup: &str, secret: &str) -> String {
    format!("{TOKEN_PREFIX}_{lookup}_{secret}")
}

/// Parses a token string into its components (lookup, secret)
pub fn parse_token(token: &str) -> Result<(String, String)> {
    let prefix = format!("{TOKEN_PREFIX}_");
    if !token.starts_with(&prefix) {
        return Err(Error::InvalidTokenFormat);
    }

    let parts: Vec<&str> = token.split('_').collect();
    if parts.len() != 3 {
        return Err(Error::InvalidTokenFormat);
    }

    let lookup = parts[1];
    let secret = parts[2];

    if lookup.len() != LOOKUP_LENGTH || secret.len() != SECRET_LENGTH {
        return Err(Error::InvalidTokenFormat);
    }

    Ok((lookup.to_string(), secret.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{Metadata, User};

    #[test]
    fn test_token_generation_format() {
        let generator = TokenGenerator::new();
        let (token, lookup, _hash) = generator.generate().unwrap();

        assert!(token.starts_with("mbee_"));
        assert_eq!(lookup.len(), 8);

        let parts: Vec<&str> = token.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "mbee");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 24);
    }

    #[test]
    fn test_token_verification() {
        let generator = TokenGenerator::new();
        let (token, _, hash) = generator.generate().unwrap();

        assert!(generator.verify(&token, &hash).unwrap());
        let wrong_token = format!("{}_wrong", &token[..token.len() - 5]);
        assert!(!generator.verify(&wrong_token, &hash).unwrap());
        assert!(hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_parse_token() {
        let (lookup, secret) = parse_token("mbee_12345678_123456789012345678901234").unwrap();
        assert_eq!(lookup, "12345678");
        assert_eq!(secret, "123456789012345678901234");

        assert!(parse_token("invalid_12345678_123456789012345678901234").is_err());
        assert!(parse_token("mbee_12345678").is_err());
    }

    #[test]
    fn test_issue_persists_token() {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();
        store
            .create_user(&User {
                username: "alice".to_string(),
                admin: false,
                password_hash: String::new(),
                fname: None,
                lname: None,
                email: None,
                custom: json!({}),
                meta: Metadata::new(None),
            })
            .unwrap();

        let generator = TokenGenerator::new();
        let (token, raw) = generator
            .issue(&store, "alice", Some(Duration::minutes(5)))
            .unwrap();

        let (lookup, _) = parse_token(&raw).unwrap();
        let stored = store.get_token_by_lookup(&lookup).unwrap().unwrap();
        assert_eq!(stored.id, token.id);
        assert_eq!(stored.username, "alice");
        assert!(stored.expires_at.is_some_and(|t| t > Utc::now()));
    }
}
