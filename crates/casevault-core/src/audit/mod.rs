//! Tamper-evident audit trail
//!
//! - `entry`: entry types, canonical serialization, chain hashing
//! - `trail`: single-writer append, chain verification, queries

pub mod entry;
pub mod trail;

pub use entry::{AuditAction, AuditEntry, AuditEvent, GENESIS_HASH};
pub use trail::{AuditTrail, ChainVerification};
