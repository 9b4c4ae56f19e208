//! Cryptographic primitives: master key handling and field encryption

pub mod cipher;
pub mod key;

pub use cipher::{CipherMode, EncryptedEnvelope, FieldCipher, StoredField};
pub use key::{KeyManager, MasterKey, MASTER_KEY_ENV, MASTER_KEY_SIZE};
