//! Credential validation and password hashing
//!
//! Passwords are hashed with argon2id (memory-hard, per-credential random
//! salt embedded in the PHC string). Verification goes through the argon2
//! crate's constant-time comparison, never string equality. A precomputed
//! dummy hash lets login spend comparable time on unknown usernames, closing
//! the username-existence timing channel.

use crate::error::{Error, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 12;

/// Username length bounds
pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=50;

/// Validate username shape: 3-50 chars, letter-led, alphanumeric + underscore
pub fn validate_username(username: &str) -> Result<()> {
    if !USERNAME_LEN.contains(&username.chars().count()) {
        return Err(Error::Validation(
            "username must be between 3 and 50 characters".into(),
        ));
    }
    let mut chars = username.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => {
            return Err(Error::Validation(
                "username must start with a letter".into(),
            ))
        }
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Validation(
            "username may contain only letters, digits and underscores".into(),
        ));
    }
    Ok(())
}

/// Validate password strength before any hashing work
///
/// Requires at least 12 characters with an uppercase letter, a lowercase
/// letter, a digit and a special character.
pub fn validate_password_strength(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| !c.is_alphanumeric());

    if !(has_upper && has_lower && has_digit && has_special) {
        return Err(Error::Validation(
            "password must contain upper and lower case letters, a digit and a special character"
                .into(),
        ));
    }
    Ok(())
}

/// Argon2id hashing and verification for stored credentials
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    /// Hash of a random throwaway value, verified against on unknown
    /// usernames so both login failure paths cost an argon2 verification.
    dummy_hash: String,
}

impl CredentialHasher {
    pub fn new() -> Self {
        let argon2 = Argon2::default();
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(b"casevault-dummy-credential", &salt)
            .map(|h| h.to_string())
            .unwrap_or_default();
        Self { argon2, dummy_hash }
    }

    /// Hash a password with a fresh random salt, returning the PHC string
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| Error::Validation(format!("password hashing failed: {}", e)))
    }

    /// Verify a password against a stored PHC string (constant-time)
    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Burn a verification of comparable cost without a real credential
    pub fn dummy_verify(&self, password: &str) {
        if let Ok(parsed) = PasswordHash::new(&self.dummy_hash) {
            let _ = self.argon2.verify_password(password.as_bytes(), &parsed);
        }
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHasher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_shape() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a_1").is_ok());
        assert!(validate_username("Z".repeat(50).as_str()).is_ok());

        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"x".repeat(51)).is_err());
        assert!(validate_username("1alice").is_err());
        assert!(validate_username("_alice").is_err());
        assert!(validate_username("al ice").is_err());
        assert!(validate_username("al-ice").is_err());
    }

    #[test]
    fn test_password_strength() {
        // From the acceptance checklist.
        assert!(validate_password_strength("short1!").is_err());
        assert!(validate_password_strength("NoDigitsHere!").is_err());
        assert!(validate_password_strength("GoodPass123!$").is_ok());

        assert!(validate_password_strength("alllowercase1!").is_err());
        assert!(validate_password_strength("ALLUPPERCASE1!").is_err());
        assert!(validate_password_strength("NoSpecials1234").is_err());
    }

    #[test]
    fn test_hash_verify_roundtrip() {
        let hasher = CredentialHasher::new();
        let hash = hasher.hash("GoodPass123!$").unwrap();

        assert!(hasher.verify("GoodPass123!$", &hash));
        assert!(!hasher.verify("WrongPass123!$", &hash));
    }

    #[test]
    fn test_fresh_salt_per_hash() {
        let hasher = CredentialHasher::new();
        let a = hasher.hash("GoodPass123!$").unwrap();
        let b = hasher.hash("GoodPass123!$").unwrap();
        assert_ne!(a, b, "same password must never produce the same PHC string");
    }

    #[test]
    fn test_hash_does_not_embed_password() {
        let hasher = CredentialHasher::new();
        let hash = hasher.hash("GoodPass123!$").unwrap();
        assert!(!hash.contains("GoodPass123"));
        assert!(hash.starts_with("$argon2"));
    }

    #[test]
    fn test_dummy_verify_does_not_panic() {
        let hasher = CredentialHasher::new();
        hasher.dummy_verify("anything at all");
    }
}
