use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::error::{Error, Result};

/// Hashes a password with Argon2id default parameters.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Config(format!("failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| Error::Config(format!("invalid hash format: {e}")))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Error::Config(format!("failed to verify password: {e}"))),
    }
}

/// Random password that satisfies the password rules, for `admin init`.
#[must_use]
pub fn generate_password() -> String {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    // Guarantee at least one letter and one digit.
    format!("m{body}0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::validate_password;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse 1").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse 1", &hash).unwrap());
        assert!(!verify_password("wrong horse 1", &hash).unwrap());
    }

    #[test]
    fn test_invalid_hash_is_error() {
        assert!(verify_password("pw", "not-a-hash").is_err());
    }

    #[test]
    fn test_generated_password_is_valid() {
        let password = generate_password();
        assert_eq!(password.len(), 22);
        assert!(validate_password(&password).is_ok());
    }
}
