//! Right-to-erasure (GDPR article 17)
//!
//! Erasure deletes every PII-bearing row for a user inside one transaction.
//! The audit trail and consent records are deliberately preserved: the trail
//! documents that the erasure happened, the consent rows document its lawful
//! basis. Neither contains raw PII.

use super::ComplianceOrchestrator;
use crate::audit::{AuditAction, AuditEvent};
use crate::consent::ConsentType;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

/// Literal the caller must supply verbatim before erasure proceeds
pub const ERASURE_CONFIRMATION: &str = "DELETE ALL MY DATA";

/// Deletion order honoring foreign keys (children before parents)
const ERASURE_TABLES: &[&str] = &[
    "chat_messages",
    "case_notes",
    "evidence",
    "cases",
    "user_profiles",
    "credentials",
];

/// Outcome of a completed erasure
#[derive(Debug, Clone, Serialize)]
pub struct ErasureReport {
    pub user_id: Uuid,
    pub erased_at: DateTime<Utc>,
    /// Rows deleted, by table
    pub deleted_counts: Vec<(String, u64)>,
    /// Audit entries naming this user as actor, kept by design of the trail
    pub preserved_audit_entries: i64,
    /// Consent rows kept as the record of lawful basis
    pub preserved_consents: i64,
}

impl ErasureReport {
    /// Total rows deleted across all tables
    pub fn total_deleted(&self) -> u64 {
        self.deleted_counts.iter().map(|(_, n)| n).sum()
    }
}

impl ComplianceOrchestrator {
    /// Erase every PII-bearing row for a user
    ///
    /// Requires the exact [`ERASURE_CONFIRMATION`] literal and an active
    /// `data_erasure_request` consent. All deletions run in a single
    /// transaction; a failure part-way rolls everything back and nothing is
    /// deleted. The `user.erase` audit entry, carrying the caller's stated
    /// reason in its digested details, is appended after the commit. If that
    /// append fails the deletion has already happened and cannot be rolled
    /// back: the append is retried once, and a persistent failure is logged
    /// at error level with the full deletion counts before the error is
    /// returned, so the erasure is never silently unrecorded.
    pub async fn delete_user_data(
        &self,
        user_id: Uuid,
        confirmation: &str,
        reason: &str,
    ) -> Result<ErasureReport> {
        if confirmation != ERASURE_CONFIRMATION {
            return Err(Error::Validation(
                "erasure confirmation text did not match".to_string(),
            ));
        }

        if !self
            .consents
            .has_active(user_id, ConsentType::DataErasureRequest)
            .await?
        {
            self.trail
                .append(
                    AuditEvent::new("user.erase", "user", user_id.to_string(), AuditAction::Erase)
                        .actor(user_id)
                        .failure("missing data_erasure_request consent"),
                )
                .await?;
            return Err(Error::ConsentRequired(
                ConsentType::DataErasureRequest.as_str().to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted_counts = Vec::with_capacity(ERASURE_TABLES.len());
        let mut rows_so_far = 0u64;
        for table in ERASURE_TABLES {
            let deleted = delete_user_rows(&mut tx, table, user_id).await.map_err(|e| {
                tracing::error!(table, error = %e, "Erasure failed, rolling back");
                Error::Transaction {
                    table: table.to_string(),
                    rows_affected: rows_so_far,
                }
            })?;
            rows_so_far += deleted;
            deleted_counts.push((table.to_string(), deleted));
        }
        tx.commit().await?;

        let erase_event = || {
            AuditEvent::new("user.erase", "user", user_id.to_string(), AuditAction::Erase)
                .actor(user_id)
                .details(serde_json::json!({
                    "reason": reason,
                    "deleted": deleted_counts
                        .iter()
                        .map(|(t, n)| (t.clone(), *n))
                        .collect::<std::collections::BTreeMap<_, _>>(),
                }))
        };

        // The deletion is already committed at this point. Retry the append
        // once, and make a persistent failure loud: an erasure must never
        // vanish from the record.
        if let Err(first) = self.trail.append(erase_event()).await {
            tracing::warn!(user_id = %user_id, error = %first, "Erasure audit append failed, retrying");
            if let Err(second) = self.trail.append(erase_event()).await {
                tracing::error!(
                    user_id = %user_id,
                    deleted = ?deleted_counts,
                    error = %second,
                    "Erasure committed but could not be recorded in the audit trail"
                );
                return Err(second);
            }
        }

        let report = ErasureReport {
            user_id,
            erased_at: Utc::now(),
            deleted_counts,
            preserved_audit_entries: self.trail.count_for_actor(user_id).await?,
            preserved_consents: self.consents.count_for_user(user_id).await?,
        };

        tracing::info!(
            user_id = %user_id,
            total_deleted = report.total_deleted(),
            "Erased user data"
        );
        Ok(report)
    }
}

async fn delete_user_rows(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    user_id: Uuid,
) -> std::result::Result<u64, sqlx::Error> {
    // Table names come from the fixed ERASURE_TABLES list, never from input.
    let sql = format!("DELETE FROM {} WHERE user_id = ?", table);
    let result = sqlx::query(&sql)
        .bind(user_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}
