//! GDPR compliance operations: subject access export and right-to-erasure
//!
//! Both operations run through [`ComplianceOrchestrator`], which ties the
//! record stores, consent store and audit trail together so every export and
//! erasure leaves a verifiable trace.

pub mod erase;
pub mod export;

pub use erase::{ErasureReport, ERASURE_CONFIRMATION};
pub use export::{ExportPolicy, ExportReceipt, UserDataExport, EXPORT_FORMAT_VERSION};

use crate::audit::AuditTrail;
use crate::consent::ConsentStore;
use crate::records::RecordStore;
use sqlx::SqlitePool;

/// Entry point for the data-subject rights operations
#[derive(Debug, Clone)]
pub struct ComplianceOrchestrator {
    pool: SqlitePool,
    records: RecordStore,
    consents: ConsentStore,
    trail: AuditTrail,
    export_policy: ExportPolicy,
}

impl ComplianceOrchestrator {
    pub fn new(
        pool: SqlitePool,
        records: RecordStore,
        consents: ConsentStore,
        trail: AuditTrail,
    ) -> Self {
        Self {
            pool,
            records,
            consents,
            trail,
            export_policy: ExportPolicy::default(),
        }
    }

    /// Override the export gating policy
    pub fn with_export_policy(mut self, policy: ExportPolicy) -> Self {
        self.export_policy = policy;
        self
    }
}
