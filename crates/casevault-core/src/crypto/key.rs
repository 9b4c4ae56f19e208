//! Master key loading and validation
//!
//! The master key is consumed from configuration (base64, exactly 32 bytes)
//! and handed only to [`FieldCipher`](crate::crypto::FieldCipher). Key bytes
//! are zeroized on drop and never logged or serialized.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand_chacha::rand_core::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-256 key in bytes
pub const MASTER_KEY_SIZE: usize = 32;

/// Environment variable holding the base64-encoded master key
pub const MASTER_KEY_ENV: &str = "CASEVAULT_MASTER_KEY";

/// A 256-bit master encryption key, securely zeroed on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; MASTER_KEY_SIZE],
}

impl MasterKey {
    /// Generate a new random master key
    pub fn generate() -> Self {
        let mut bytes = [0u8; MASTER_KEY_SIZE];
        aes_gcm::aead::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create a master key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != MASTER_KEY_SIZE {
            return Err(Error::Configuration(format!(
                "master key must be exactly {} bytes, got {}",
                MASTER_KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; MASTER_KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Create a master key from a base64-encoded string
    pub fn from_base64(b64: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(b64.trim())
            .map_err(|e| Error::Configuration(format!("master key is not valid base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Export key as base64 (for initial provisioning only)
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    /// Get the raw key bytes (use carefully)
    pub(crate) fn as_bytes(&self) -> &[u8; MASTER_KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Loads and validates the master key once at startup
///
/// Absence or malformation of the key is a fatal [`Error::Configuration`] in
/// any context expecting encryption. There is no silent plaintext fallback;
/// callers that genuinely need an unencrypted store must construct
/// [`CipherMode::Disabled`](crate::crypto::CipherMode) explicitly.
#[derive(Debug, Clone)]
pub struct KeyManager {
    key: MasterKey,
}

impl KeyManager {
    /// Wrap an already-validated key
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }

    /// Load the key from the `CASEVAULT_MASTER_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        let b64 = std::env::var(MASTER_KEY_ENV).map_err(|_| {
            Error::Configuration(format!(
                "{} is not set; a base64-encoded 256-bit key is required",
                MASTER_KEY_ENV
            ))
        })?;
        Ok(Self::new(MasterKey::from_base64(&b64)?))
    }

    /// Load the key from an explicit base64 string (e.g. from config)
    pub fn from_base64(b64: &str) -> Result<Self> {
        Ok(Self::new(MasterKey::from_base64(b64)?))
    }

    /// Access the key. Exposed only to the cipher layer.
    pub(crate) fn key(&self) -> &MasterKey {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let key1 = MasterKey::generate();
        let key2 = MasterKey::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_base64_roundtrip() {
        let key = MasterKey::generate();
        let restored = MasterKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.as_bytes(), restored.as_bytes());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = STANDARD.encode([7u8; 16]);
        let result = MasterKey::from_base64(&short);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_malformed_base64_rejected() {
        let result = MasterKey::from_base64("not-base64!!!");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = MasterKey::generate();
        let debug = format!("{:?}", key);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&key.to_base64()));
    }

    #[test]
    fn test_key_manager_missing_env_is_fatal() {
        std::env::remove_var(MASTER_KEY_ENV);
        let result = KeyManager::from_env();
        assert!(matches!(result, Err(ref e) if e.is_fatal()));
    }
}
