//! Database migrations
//!
//! This module manages SQLite schema migrations for casevault.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 4;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Accounts and PII-bearing case data
///
/// PII columns (`email`, `display_name`, `summary`, `body`, `content`) hold
/// either legacy plaintext or a serialized encrypted envelope; they are
/// decoded at the storage boundary, never interpreted in SQL.
const MIGRATION_V1: &str = r#"
    -- Login credentials. password_hash is an argon2id PHC string.
    CREATE TABLE IF NOT EXISTS credentials (
        user_id TEXT PRIMARY KEY NOT NULL,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        last_login_at TIMESTAMP
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_credentials_username ON credentials(username);

    -- User profile PII
    CREATE TABLE IF NOT EXISTS user_profiles (
        user_id TEXT PRIMARY KEY NOT NULL,
        display_name TEXT,
        email TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    -- Legal cases
    CREATE TABLE IF NOT EXISTS cases (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        summary TEXT,
        status TEXT NOT NULL DEFAULT 'open' CHECK (status IN ('open', 'closed', 'archived')),
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_cases_user_id ON cases(user_id);
    CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status);

    -- Notes attached to cases
    CREATE TABLE IF NOT EXISTS case_notes (
        id TEXT PRIMARY KEY NOT NULL,
        case_id TEXT NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_case_notes_case_id ON case_notes(case_id);
    CREATE INDEX IF NOT EXISTS idx_case_notes_user_id ON case_notes(user_id);

    -- AI chat history
    CREATE TABLE IF NOT EXISTS chat_messages (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT NOT NULL,
        role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
        content TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_chat_messages_user_id ON chat_messages(user_id);
    CREATE INDEX IF NOT EXISTS idx_chat_messages_created_at ON chat_messages(created_at);
"#;

/// Migration 2: Hash-chained audit log
///
/// Append-only: rows are never updated or deleted except by full database
/// reset. `seq` gives insertion order for chain verification; `actor_id` and
/// `resource_id` carry no foreign keys so entries survive user erasure.
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        timestamp TIMESTAMP NOT NULL,
        event_type TEXT NOT NULL,
        actor_id TEXT,
        resource_type TEXT NOT NULL,
        resource_id TEXT NOT NULL,
        action TEXT NOT NULL CHECK (action IN (
            'create', 'read', 'update', 'delete',
            'login', 'logout', 'export', 'erase'
        )),
        details_digest TEXT NOT NULL,
        success INTEGER NOT NULL,
        error_message TEXT,
        prev_hash TEXT NOT NULL,
        entry_hash TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_log_event_type ON audit_log(event_type);
    CREATE INDEX IF NOT EXISTS idx_audit_log_resource ON audit_log(resource_type, resource_id);
    CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log(timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_log_actor_id ON audit_log(actor_id);
"#;

/// Migration 3: GDPR consent records
///
/// One row per (user, consent type). Rows survive user erasure and carry no
/// foreign key to credentials.
const MIGRATION_V3: &str = r#"
    CREATE TABLE IF NOT EXISTS consent_records (
        user_id TEXT NOT NULL,
        consent_type TEXT NOT NULL,
        granted INTEGER NOT NULL DEFAULT 0,
        granted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        revoked_at TIMESTAMP,
        PRIMARY KEY (user_id, consent_type)
    );

    CREATE INDEX IF NOT EXISTS idx_consent_records_user_id ON consent_records(user_id);
"#;

/// Migration 4: Evidence attached to cases
///
/// `description` and `content` are PII columns holding plaintext or a
/// serialized encrypted envelope, like the other sensitive columns.
const MIGRATION_V4: &str = r#"
    CREATE TABLE IF NOT EXISTS evidence (
        id TEXT PRIMARY KEY NOT NULL,
        case_id TEXT NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        label TEXT NOT NULL,
        description TEXT NOT NULL,
        content TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_evidence_case_id ON evidence(case_id);
    CREATE INDEX IF NOT EXISTS idx_evidence_user_id ON evidence(user_id);
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    // Get the latest version; MAX() is NULL before the first migration
    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Accounts and case data");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Hash-chained audit log");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    if current_version < 3 {
        tracing::info!("Applying migration v3: Consent records");
        sqlx::raw_sql(MIGRATION_V3).execute(pool).await?;
        record_migration(pool, 3).await?;
    }

    if current_version < 4 {
        tracing::info!("Applying migration v4: Evidence");
        sqlx::raw_sql(MIGRATION_V4).execute(pool).await?;
        record_migration(pool, 4).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}
