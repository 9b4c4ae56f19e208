//! GDPR consent records
//!
//! One row per (user, consent type). Consent records document the lawful
//! basis for processing and are exempt from erasure; they outlive the user
//! they refer to.

use crate::audit::{AuditAction, AuditEvent, AuditTrail};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

/// A category of data processing the user can consent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsentType {
    /// General processing of personal data by the application
    DataProcessing,
    /// Data portability / export
    DataPortability,
    /// The user has requested erasure of their data
    DataErasureRequest,
}

impl ConsentType {
    /// Create from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "data_processing" => Some(Self::DataProcessing),
            "data_portability" => Some(Self::DataPortability),
            "data_erasure_request" => Some(Self::DataErasureRequest),
            _ => None,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataProcessing => "data_processing",
            Self::DataPortability => "data_portability",
            Self::DataErasureRequest => "data_erasure_request",
        }
    }
}

impl std::fmt::Display for ConsentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's grant or withdrawal of a processing consent
#[derive(Debug, Clone)]
pub struct ConsentRecord {
    pub user_id: Uuid,
    pub consent_type: ConsentType,
    pub granted: bool,
    pub granted_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Store for consent records
#[derive(Debug, Clone)]
pub struct ConsentStore {
    pool: SqlitePool,
    trail: AuditTrail,
}

impl ConsentStore {
    pub fn new(pool: SqlitePool, trail: AuditTrail) -> Self {
        Self { pool, trail }
    }

    /// Record an active consent grant (upsert per user and type)
    pub async fn grant(&self, user_id: Uuid, consent_type: ConsentType) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consent_records (user_id, consent_type, granted, granted_at, revoked_at)
            VALUES (?, ?, 1, CURRENT_TIMESTAMP, NULL)
            ON CONFLICT(user_id, consent_type)
            DO UPDATE SET granted = 1, granted_at = CURRENT_TIMESTAMP, revoked_at = NULL
            "#,
        )
        .bind(user_id.to_string())
        .bind(consent_type.as_str())
        .execute(&self.pool)
        .await?;

        self.trail
            .append(
                AuditEvent::new("consent.grant", "consent", consent_type.as_str(), AuditAction::Update)
                    .actor(user_id),
            )
            .await?;
        Ok(())
    }

    /// Withdraw a consent; the record stays, marked revoked
    ///
    /// Revoking a consent that was never granted changes nothing and leaves
    /// no `consent.revoke` entry in the trail.
    pub async fn revoke(&self, user_id: Uuid, consent_type: ConsentType) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE consent_records
            SET granted = 0, revoked_at = CURRENT_TIMESTAMP
            WHERE user_id = ? AND consent_type = ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(consent_type.as_str())
        .execute(&self.pool)
        .await?;

        // Only record revocations that actually changed a row.
        if result.rows_affected() == 0 {
            tracing::debug!(user_id = %user_id, consent_type = %consent_type, "Revoke matched no consent record");
            return Ok(());
        }

        self.trail
            .append(
                AuditEvent::new("consent.revoke", "consent", consent_type.as_str(), AuditAction::Update)
                    .actor(user_id),
            )
            .await?;
        Ok(())
    }

    /// Whether the user currently holds an active consent of this type
    pub async fn has_active(&self, user_id: Uuid, consent_type: ConsentType) -> Result<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT granted FROM consent_records WHERE user_id = ? AND consent_type = ?",
        )
        .bind(user_id.to_string())
        .bind(consent_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(granted,)| granted).unwrap_or(false))
    }

    /// All consent records for a user, including revoked ones
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ConsentRecord>> {
        let rows: Vec<ConsentRow> = sqlx::query_as(
            r#"
            SELECT user_id, consent_type, granted, granted_at, revoked_at
            FROM consent_records
            WHERE user_id = ?
            ORDER BY consent_type
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    /// Number of consent records held for a user
    pub async fn count_for_user(&self, user_id: Uuid) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM consent_records WHERE user_id = ?")
                .bind(user_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct ConsentRow {
    user_id: String,
    consent_type: String,
    granted: bool,
    granted_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl ConsentRow {
    fn into_record(self) -> Result<ConsentRecord> {
        let user_id = Uuid::parse_str(&self.user_id)
            .map_err(|e| Error::Validation(format!("corrupt user id in consent record: {}", e)))?;
        let consent_type = ConsentType::parse(&self.consent_type).ok_or_else(|| {
            Error::Validation(format!("unknown consent type: {}", self.consent_type))
        })?;
        Ok(ConsentRecord {
            user_id,
            consent_type,
            granted: self.granted,
            granted_at: self.granted_at,
            revoked_at: self.revoked_at,
        })
    }
}
