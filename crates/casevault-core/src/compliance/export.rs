//! Subject access export (GDPR article 15 / 20)
//!
//! Produces a single JSON-serializable document containing every category of
//! personal data held for a user, decrypted. The export itself is a
//! security-relevant action and is appended to the audit trail with per
//! category counts.

use super::ComplianceOrchestrator;
use crate::audit::{AuditAction, AuditEvent};
use crate::consent::ConsentType;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Version stamped into every export document
pub const EXPORT_FORMAT_VERSION: u32 = 1;

const EXPORT_DISCLAIMER: &str = "This document contains all personal data held \
for the identified user at the time of generation, in decrypted form. Treat it \
as confidential and delete it once it has served its purpose.";

/// Gating rule applied before an export is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPolicy {
    /// Require an active consent of the given type
    RequireConsent(ConsentType),
    /// Export without a consent check (operator-driven subject access requests)
    Unconditional,
}

impl Default for ExportPolicy {
    fn default() -> Self {
        Self::RequireConsent(ConsentType::DataProcessing)
    }
}

/// Receipt for an export written to disk
#[derive(Debug, Clone)]
pub struct ExportReceipt {
    pub file_path: std::path::PathBuf,
    pub total_records: u64,
}

/// The complete export document
#[derive(Debug, Clone, Serialize)]
pub struct UserDataExport {
    pub metadata: ExportMetadata,
    pub disclaimer: String,
    pub account: Option<AccountSection>,
    pub profile: Option<ProfileSection>,
    pub cases: Vec<CaseSection>,
    pub chat_messages: Vec<ChatMessageSection>,
    pub consents: Vec<ConsentSection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportMetadata {
    pub format_version: u32,
    pub generated_at: DateTime<Utc>,
    pub user_id: Uuid,
    /// Names of the sections present in this document
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSection {
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileSection {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseSection {
    pub id: Uuid,
    pub title: String,
    pub summary: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub notes: Vec<CaseNoteSection>,
    pub evidence: Vec<EvidenceSection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceSection {
    pub id: Uuid,
    pub label: String,
    pub description: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseNoteSection {
    pub id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageSection {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsentSection {
    pub consent_type: String,
    pub granted: bool,
    pub granted_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl UserDataExport {
    /// Total number of records across all sections
    pub fn total_records(&self) -> u64 {
        let notes: usize = self.cases.iter().map(|c| c.notes.len()).sum();
        let evidence: usize = self.cases.iter().map(|c| c.evidence.len()).sum();
        (self.account.is_some() as usize
            + self.profile.is_some() as usize
            + self.cases.len()
            + notes
            + evidence
            + self.chat_messages.len()
            + self.consents.len()) as u64
    }
}

impl ComplianceOrchestrator {
    /// Produce the full export document for a user
    ///
    /// Fails with [`Error::ConsentRequired`] when the configured policy
    /// demands a consent the user does not actively hold.
    pub async fn export_user_data(&self, user_id: Uuid) -> Result<UserDataExport> {
        if let ExportPolicy::RequireConsent(consent_type) = self.export_policy {
            if !self.consents.has_active(user_id, consent_type).await? {
                return Err(Error::ConsentRequired(consent_type.as_str().to_string()));
            }
        }

        let account = self.account_section(user_id).await?;
        let profile = self.records.get_profile(user_id).await?.map(|p| ProfileSection {
            display_name: p.display_name,
            email: p.email,
            created_at: p.created_at,
            updated_at: p.updated_at,
        });

        let mut cases = Vec::new();
        let mut note_count = 0usize;
        let mut evidence_count = 0usize;
        for case in self.records.cases_for_user(user_id).await? {
            let notes: Vec<CaseNoteSection> = self
                .records
                .notes_for_case(case.id)
                .await?
                .into_iter()
                .map(|n| CaseNoteSection {
                    id: n.id,
                    body: n.body,
                    created_at: n.created_at,
                })
                .collect();
            note_count += notes.len();
            let evidence: Vec<EvidenceSection> = self
                .records
                .evidence_for_case(case.id)
                .await?
                .into_iter()
                .map(|e| EvidenceSection {
                    id: e.id,
                    label: e.label,
                    description: e.description,
                    content: e.content,
                    created_at: e.created_at,
                })
                .collect();
            evidence_count += evidence.len();
            cases.push(CaseSection {
                id: case.id,
                title: case.title,
                summary: case.summary,
                status: case.status.as_str().to_string(),
                created_at: case.created_at,
                notes,
                evidence,
            });
        }

        let chat_messages: Vec<ChatMessageSection> = self
            .records
            .chat_for_user(user_id)
            .await?
            .into_iter()
            .map(|m| ChatMessageSection {
                id: m.id,
                role: m.role.as_str().to_string(),
                content: m.content,
                created_at: m.created_at,
            })
            .collect();

        let consents: Vec<ConsentSection> = self
            .consents
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|c| ConsentSection {
                consent_type: c.consent_type.as_str().to_string(),
                granted: c.granted,
                granted_at: c.granted_at,
                revoked_at: c.revoked_at,
            })
            .collect();

        let mut categories = Vec::new();
        if account.is_some() {
            categories.push("account".to_string());
        }
        if profile.is_some() {
            categories.push("profile".to_string());
        }
        categories.push("cases".to_string());
        categories.push("chat_messages".to_string());
        categories.push("consents".to_string());

        let export = UserDataExport {
            metadata: ExportMetadata {
                format_version: EXPORT_FORMAT_VERSION,
                generated_at: Utc::now(),
                user_id,
                categories,
            },
            disclaimer: EXPORT_DISCLAIMER.to_string(),
            account,
            profile,
            cases,
            chat_messages,
            consents,
        };

        // The audit record carries counts only, never the exported content.
        self.trail
            .append(
                AuditEvent::new("user.export", "user", user_id.to_string(), AuditAction::Export)
                    .actor(user_id)
                    .details(serde_json::json!({
                        "cases": export.cases.len(),
                        "case_notes": note_count,
                        "evidence": evidence_count,
                        "chat_messages": export.chat_messages.len(),
                        "consents": export.consents.len(),
                    })),
            )
            .await?;

        tracing::info!(user_id = %user_id, cases = export.cases.len(), "Generated user data export");
        Ok(export)
    }

    /// Produce the export document and write it to a file in `dir`
    pub async fn export_user_data_to_file(
        &self,
        user_id: Uuid,
        dir: &std::path::Path,
    ) -> Result<ExportReceipt> {
        let export = self.export_user_data(user_id).await?;
        let json = serde_json::to_string_pretty(&export)
            .map_err(|e| Error::Validation(format!("export serialization failed: {}", e)))?;

        std::fs::create_dir_all(dir)?;
        let file_name = format!(
            "casevault-export-{}-{}.json",
            user_id,
            export.metadata.generated_at.format("%Y%m%dT%H%M%SZ")
        );
        let file_path = dir.join(file_name);
        std::fs::write(&file_path, json)?;

        Ok(ExportReceipt {
            file_path,
            total_records: export.total_records(),
        })
    }

    async fn account_section(&self, user_id: Uuid) -> Result<Option<AccountSection>> {
        let row: Option<(String, DateTime<Utc>, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT username, created_at, last_login_at FROM credentials WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(username, created_at, last_login_at)| AccountSection {
            username,
            created_at,
            last_login_at,
        }))
    }
}
