//! Audit entry types and chain hashing
//!
//! Every security-relevant action is recorded as an [`AuditEntry`] whose
//! `entry_hash` covers the previous entry's hash, making retroactive
//! tampering detectable. Callers supply only non-sensitive metadata; the
//! entry stores a digest of it, never raw PII.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fixed `prev_hash` of the first entry in the chain
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Field separator for the canonical serialization (ASCII unit separator)
const CANONICAL_SEP: char = '\u{1f}';

/// Action recorded by an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
    Export,
    Erase,
}

impl AuditAction {
    /// Create from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "read" => Some(Self::Read),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "login" => Some(Self::Login),
            "logout" => Some(Self::Logout),
            "export" => Some(Self::Export),
            "erase" => Some(Self::Erase),
            _ => None,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Export => "export",
            Self::Erase => "erase",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A security-relevant event to be appended to the trail
///
/// `details` must contain only non-sensitive metadata (counts, ids, reason
/// codes). It is digested before storage, so raw values never land in the
/// audit table; keeping PII out of it is a calling convention this crate's
/// own call sites follow and tests enforce.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Dotted event name, e.g. `auth.login` or `user.erase`
    pub event_type: String,
    /// Acting user, when known
    pub actor_id: Option<Uuid>,
    /// Kind of resource acted on, e.g. `case`, `session`, `user`
    pub resource_type: String,
    /// Identifier of the resource
    pub resource_id: String,
    /// What was done
    pub action: AuditAction,
    /// Non-sensitive metadata, digested before storage
    pub details: serde_json::Value,
    /// Whether the operation succeeded
    pub success: bool,
    /// Internal failure cause; may be specific where the user-facing error is generic
    pub error_message: Option<String>,
}

impl AuditEvent {
    /// Create a successful event with empty details
    pub fn new(
        event_type: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        action: AuditAction,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            actor_id: None,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action,
            details: serde_json::Value::Null,
            success: true,
            error_message: None,
        }
    }

    /// Set the acting user
    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Attach non-sensitive metadata
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Mark the event as failed with an internal cause
    pub fn failure(mut self, cause: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(cause.into());
        self
    }

    /// Digest of the details metadata (sha256 hex of its JSON form)
    pub fn details_digest(&self) -> String {
        let json = self.details.to_string();
        hex::encode(Sha256::digest(json.as_bytes()))
    }
}

/// A fully populated, immutable audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry identifier
    pub id: Uuid,
    /// Insertion order within the chain
    pub seq: i64,
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
    /// Dotted event name
    pub event_type: String,
    /// Acting user, when known
    pub actor_id: Option<Uuid>,
    /// Kind of resource acted on
    pub resource_type: String,
    /// Identifier of the resource
    pub resource_id: String,
    /// What was done
    pub action: AuditAction,
    /// Digest of the caller-supplied metadata
    pub details_digest: String,
    /// Whether the operation succeeded
    pub success: bool,
    /// Internal failure cause
    pub error_message: Option<String>,
    /// `entry_hash` of the previous entry, or [`GENESIS_HASH`]
    pub prev_hash: String,
    /// sha256(prev_hash || canonical serialization of this entry)
    pub entry_hash: String,
}

impl AuditEntry {
    /// Canonical serialization of the hashed fields
    ///
    /// Field order and formatting are fixed; the timestamp uses RFC 3339
    /// with microsecond precision so the value round-trips unchanged through
    /// storage.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        let mut push = |field: &str| {
            out.push_str(field);
            out.push(CANONICAL_SEP);
        };
        push(&self.id.to_string());
        push(&self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true));
        push(&self.event_type);
        push(&self.actor_id.map(|a| a.to_string()).unwrap_or_default());
        push(&self.resource_type);
        push(&self.resource_id);
        push(self.action.as_str());
        push(&self.details_digest);
        push(if self.success { "1" } else { "0" });
        push(self.error_message.as_deref().unwrap_or_default());
        out
    }

    /// Recompute the chain hash from `prev_hash` and the canonical form
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.canonical().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify that the stored `entry_hash` matches the entry's content
    pub fn hash_is_valid(&self) -> bool {
        self.entry_hash == self.compute_hash()
    }
}
