//! Per-field authenticated encryption
//!
//! Field values are encrypted with AES-256-GCM into a self-describing
//! [`EncryptedEnvelope`]. Stored columns may also hold legacy plaintext;
//! [`StoredField`] is the explicit tagged variant decoded once at the
//! storage boundary, so call sites never shape-sniff raw strings.

use crate::crypto::key::{KeyManager, MasterKey};
use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand_chacha::rand_core::RngCore;
use serde::{Deserialize, Serialize};

/// Size of the AES-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Envelope schema version written into every new envelope
const SCHEMA_VERSION: u8 = 1;

/// An encrypted field value: ciphertext, nonce and authentication tag
///
/// Serialized as a JSON object; a single bit flip in any component makes
/// decryption fail deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Schema version
    pub v: u8,
    /// Base64-encoded 12-byte nonce
    pub iv: String,
    /// Base64-encoded ciphertext (without the tag)
    pub ct: String,
    /// Base64-encoded 16-byte GCM authentication tag
    pub tag: String,
}

/// A stored column value, decoded once at the storage boundary
///
/// Legacy columns written before encryption was adopted hold bare strings;
/// new writes hold serialized envelopes. The two are distinguished by JSON
/// shape, never by guessing at call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredField {
    /// Legacy plaintext value, passed through unchanged
    Plain(String),
    /// Encrypted envelope
    Encrypted(EncryptedEnvelope),
}

impl StoredField {
    /// Decode a raw column value into its tagged form
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<EncryptedEnvelope>(raw) {
            Ok(envelope) => Self::Encrypted(envelope),
            Err(_) => Self::Plain(raw.to_string()),
        }
    }

    /// Encode for storage
    pub fn encode(&self) -> String {
        match self {
            Self::Plain(s) => s.clone(),
            // Envelope serialization cannot fail: all fields are strings.
            Self::Encrypted(envelope) => {
                serde_json::to_string(envelope).unwrap_or_else(|_| String::new())
            }
        }
    }

    /// Whether this value is encrypted at rest
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }
}

/// Cipher operating mode
///
/// `Disabled` exists for legacy call sites that must keep writing plaintext;
/// it is only ever selected explicitly, never as a fallback for a missing key.
#[derive(Debug, Clone)]
pub enum CipherMode {
    /// Encrypt and decrypt with the master key
    Active(KeyManager),
    /// Store plaintext; decrypt still passes through legacy values
    Disabled,
}

/// Authenticated encrypt/decrypt of individual field values
///
/// Stateless given the key; cheap to clone and safe to share across tasks.
#[derive(Debug, Clone)]
pub struct FieldCipher {
    mode: CipherMode,
}

impl FieldCipher {
    /// Create a cipher keyed by the given manager
    pub fn new(keys: KeyManager) -> Self {
        Self {
            mode: CipherMode::Active(keys),
        }
    }

    /// Create a cipher that stores plaintext (explicit opt-out)
    pub fn disabled() -> Self {
        Self {
            mode: CipherMode::Disabled,
        }
    }

    /// Whether encryption is active
    pub fn is_active(&self) -> bool {
        matches!(self.mode, CipherMode::Active(_))
    }

    /// Encrypt a plaintext value into an envelope
    ///
    /// A fresh random nonce is generated per call; nonce reuse under the
    /// same key is forbidden.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedEnvelope> {
        let keys = match &self.mode {
            CipherMode::Active(keys) => keys,
            CipherMode::Disabled => {
                return Err(Error::Encryption(
                    "cipher is in disabled mode; use encrypt_field for plaintext storage".into(),
                ))
            }
        };

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = cipher_for(keys.key())?;
        let mut combined = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Encryption(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext; split it out so the
        // envelope carries ciphertext and tag as separate components.
        let tag = combined.split_off(combined.len() - TAG_SIZE);

        Ok(EncryptedEnvelope {
            v: SCHEMA_VERSION,
            iv: STANDARD.encode(nonce_bytes),
            ct: STANDARD.encode(&combined),
            tag: STANDARD.encode(&tag),
        })
    }

    /// Decrypt an envelope back to plaintext
    ///
    /// Fails with a single opaque [`Error::Decryption`] on any failure mode
    /// (bad nonce, truncated ciphertext, tag mismatch, invalid UTF-8) so the
    /// error cannot be used as a decryption oracle.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<String> {
        let keys = match &self.mode {
            CipherMode::Active(keys) => keys,
            CipherMode::Disabled => return Err(Error::Decryption),
        };

        let nonce_bytes = STANDARD.decode(&envelope.iv).map_err(|_| Error::Decryption)?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(Error::Decryption);
        }
        let mut combined = STANDARD.decode(&envelope.ct).map_err(|_| Error::Decryption)?;
        let tag = STANDARD.decode(&envelope.tag).map_err(|_| Error::Decryption)?;
        if tag.len() != TAG_SIZE {
            return Err(Error::Decryption);
        }
        combined.extend_from_slice(&tag);

        let nonce = Nonce::from_slice(&nonce_bytes);
        let cipher = cipher_for(keys.key()).map_err(|_| Error::Decryption)?;
        let plaintext = cipher
            .decrypt(nonce, combined.as_ref())
            .map_err(|_| Error::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| Error::Decryption)
    }

    /// Encrypt a value for storage, honoring the cipher mode
    pub fn encrypt_field(&self, plaintext: &str) -> Result<StoredField> {
        match &self.mode {
            CipherMode::Active(_) => Ok(StoredField::Encrypted(self.encrypt(plaintext)?)),
            CipherMode::Disabled => Ok(StoredField::Plain(plaintext.to_string())),
        }
    }

    /// Decrypt a stored value, passing legacy plaintext through unchanged
    pub fn decrypt_field(&self, field: &StoredField) -> Result<String> {
        match field {
            StoredField::Plain(s) => Ok(s.clone()),
            StoredField::Encrypted(envelope) => self.decrypt(envelope),
        }
    }

    /// Decode and decrypt a raw column value in one step
    pub fn decrypt_column(&self, raw: &str) -> Result<String> {
        self.decrypt_field(&StoredField::decode(raw))
    }
}

fn cipher_for(key: &MasterKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| Error::Encryption(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key::MasterKey;

    fn test_cipher() -> FieldCipher {
        FieldCipher::new(KeyManager::new(MasterKey::generate()))
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        for plaintext in ["", "secret", "unicode: żółć 日本語", &"x".repeat(10_000)] {
            let envelope = cipher.encrypt(plaintext).unwrap();
            assert_eq!(cipher.decrypt(&envelope).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same input").unwrap();
        let b = cipher.encrypt("same input").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ct, b.ct);
    }

    #[test]
    fn test_bit_flip_anywhere_fails_decryption() {
        let cipher = test_cipher();
        let envelope = cipher.encrypt("sensitive value").unwrap();

        let flip = |b64: &str| -> String {
            let mut bytes = STANDARD.decode(b64).unwrap();
            bytes[0] ^= 0x01;
            STANDARD.encode(bytes)
        };

        for (iv, ct, tag) in [
            (flip(&envelope.iv), envelope.ct.clone(), envelope.tag.clone()),
            (envelope.iv.clone(), flip(&envelope.ct), envelope.tag.clone()),
            (envelope.iv.clone(), envelope.ct.clone(), flip(&envelope.tag)),
        ] {
            let tampered = EncryptedEnvelope {
                v: envelope.v,
                iv,
                ct,
                tag,
            };
            assert!(matches!(cipher.decrypt(&tampered), Err(Error::Decryption)));
        }
    }

    #[test]
    fn test_wrong_key_fails_opaquely() {
        let envelope = test_cipher().encrypt("secret").unwrap();
        let other = test_cipher();
        assert!(matches!(other.decrypt(&envelope), Err(Error::Decryption)));
    }

    #[test]
    fn test_stored_field_tagging() {
        let cipher = test_cipher();
        let envelope = cipher.encrypt("value").unwrap();
        let raw = StoredField::Encrypted(envelope).encode();

        assert!(StoredField::decode(&raw).is_encrypted());
        assert!(!StoredField::decode("just a note").is_encrypted());
        // A JSON-looking string that is not an envelope stays plaintext.
        assert!(!StoredField::decode(r#"{"foo": "bar"}"#).is_encrypted());
    }

    #[test]
    fn test_legacy_plaintext_passthrough() {
        let cipher = test_cipher();
        assert_eq!(cipher.decrypt_column("legacy value").unwrap(), "legacy value");
    }

    #[test]
    fn test_disabled_mode_is_explicit() {
        let cipher = FieldCipher::disabled();
        assert!(!cipher.is_active());

        let field = cipher.encrypt_field("value").unwrap();
        assert_eq!(field, StoredField::Plain("value".to_string()));
        assert_eq!(cipher.decrypt_field(&field).unwrap(), "value");

        // Direct envelope encryption is refused, not silently skipped.
        assert!(cipher.encrypt("value").is_err());
    }

    #[test]
    fn test_column_roundtrip_hides_plaintext() {
        let cipher = test_cipher();
        let raw = cipher.encrypt_field("privileged attorney note").unwrap().encode();
        assert!(!raw.contains("privileged"));
        assert_eq!(cipher.decrypt_column(&raw).unwrap(), "privileged attorney note");
    }
}
