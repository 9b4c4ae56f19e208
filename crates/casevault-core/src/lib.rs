//! Casevault Core Library
//!
//! This crate provides the data protection layer for Casevault, including:
//! - Field-level AES-256-GCM encryption at the storage boundary
//! - Append-only, hash-chained audit trail
//! - Authentication (argon2id credentials, sessions, rate limiting)
//! - Consent records and GDPR export / erasure
//! - Storage (SQLite with versioned migrations)

pub mod audit;
pub mod auth;
pub mod compliance;
pub mod config;
pub mod consent;
pub mod crypto;
pub mod error;
pub mod records;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audit::{AuditAction, AuditEntry, AuditEvent, AuditTrail};
    pub use crate::auth::AuthenticationService;
    pub use crate::compliance::{ComplianceOrchestrator, ExportPolicy, ERASURE_CONFIRMATION};
    pub use crate::config::Config;
    pub use crate::consent::{ConsentStore, ConsentType};
    pub use crate::crypto::{FieldCipher, KeyManager, MasterKey};
    pub use crate::error::{Error, Result};
    pub use crate::records::RecordStore;
    pub use crate::storage::Database;
}
