//! Authentication service
//!
//! Registration, login, session validation and logout, with every outcome
//! recorded in the audit trail. Login failures are generic to the caller
//! ("invalid username or password") while the audit log keeps the specific
//! cause, and an unknown username burns a dummy hash verification so the two
//! failure paths are indistinguishable in timing.

use super::password::{validate_password_strength, validate_username, CredentialHasher};
use super::rate_limit::RateLimiter;
use super::session_store::{Session, SessionLookup, SessionStore};
use crate::audit::{AuditAction, AuditEvent, AuditTrail};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

/// Default session time to live
const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;

/// A stored login credential
#[derive(Debug, Clone)]
pub struct Credential {
    pub user_id: Uuid,
    pub username: String,
    /// argon2id PHC string; salt is embedded
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Registration, login and session management
#[derive(Debug, Clone)]
pub struct AuthenticationService {
    pool: SqlitePool,
    trail: AuditTrail,
    sessions: SessionStore,
    hasher: CredentialHasher,
    limiter: RateLimiter,
}

impl AuthenticationService {
    /// Create a service with the default session TTL and rate limits
    pub fn new(pool: SqlitePool, trail: AuditTrail) -> Self {
        Self::with_session_ttl(pool, trail, Duration::minutes(DEFAULT_SESSION_TTL_MINUTES))
    }

    /// Create a service issuing sessions with a custom TTL
    pub fn with_session_ttl(pool: SqlitePool, trail: AuditTrail, ttl: Duration) -> Self {
        Self {
            pool,
            trail,
            sessions: SessionStore::new(ttl),
            hasher: CredentialHasher::new(),
            limiter: RateLimiter::default(),
        }
    }

    /// Replace the rate limiter (tighter limits in tests)
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// The in-memory session store
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Register a new user
    ///
    /// Username and password shape are validated before any hashing work.
    /// The raw password is never logged or audited.
    pub async fn register(&self, username: &str, password: &str) -> Result<Uuid> {
        validate_username(username)?;
        validate_password_strength(password)?;

        let user_id = Uuid::new_v4();
        let password_hash = self.hasher.hash(password)?;

        let result = sqlx::query(
            "INSERT INTO credentials (user_id, username, password_hash) VALUES (?, ?, ?)",
        )
        .bind(user_id.to_string())
        .bind(username)
        .bind(&password_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.trail
                    .append(
                        AuditEvent::new("auth.register", "user", user_id.to_string(), AuditAction::Create)
                            .actor(user_id),
                    )
                    .await?;
                info!(user_id = %user_id, "Registered new user");
                Ok(user_id)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                self.trail
                    .append(
                        AuditEvent::new("auth.register", "user", username, AuditAction::Create)
                            .failure("username_taken"),
                    )
                    .await?;
                Err(Error::UsernameTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Authenticate and issue a session token
    ///
    /// Returns the same generic error for an unknown username and a wrong
    /// password; the audit trail records which it was.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<String> {
        if self.limiter.lockout_remaining(username).is_some() {
            self.trail
                .append(
                    AuditEvent::new("auth.login", "user", username, AuditAction::Login)
                        .failure("rate_limited"),
                )
                .await?;
            return Err(Error::RateLimited);
        }

        let credential = self.find_by_username(username).await?;

        let Some(credential) = credential else {
            // Burn a comparable-cost verification so a missing username is
            // not observable through response timing.
            self.hasher.dummy_verify(password);
            self.record_login_failure(username, "user_not_found").await?;
            return Err(Error::InvalidCredentials);
        };

        if !self.hasher.verify(password, &credential.password_hash) {
            self.record_login_failure(username, "wrong_password").await?;
            return Err(Error::InvalidCredentials);
        }

        self.limiter.record_success(username);

        sqlx::query("UPDATE credentials SET last_login_at = CURRENT_TIMESTAMP WHERE user_id = ?")
            .bind(credential.user_id.to_string())
            .execute(&self.pool)
            .await?;

        let session = self.sessions.create(credential.user_id, ip_address, user_agent);
        self.trail
            .append(
                AuditEvent::new("auth.login", "session", &session.session_id[..8], AuditAction::Login)
                    .actor(credential.user_id),
            )
            .await?;

        info!(user_id = %credential.user_id, "User logged in");
        Ok(session.session_id)
    }

    /// Validate a session token
    ///
    /// An expired session is evicted and audited as `session.expired`,
    /// an event distinct from logout.
    pub async fn validate_session(&self, session_id: &str) -> Result<Option<Session>> {
        match self.sessions.lookup(session_id) {
            SessionLookup::Valid(session) => Ok(Some(session)),
            SessionLookup::Expired(session) => {
                self.trail
                    .append(
                        AuditEvent::new(
                            "session.expired",
                            "session",
                            &session.session_id[..8],
                            AuditAction::Logout,
                        )
                        .actor(session.user_id),
                    )
                    .await?;
                Ok(None)
            }
            SessionLookup::Missing => Ok(None),
        }
    }

    /// End a session; idempotent
    pub async fn logout(&self, session_id: &str) -> Result<bool> {
        match self.sessions.remove(session_id) {
            Some(session) => {
                self.trail
                    .append(
                        AuditEvent::new(
                            "auth.logout",
                            "session",
                            &session.session_id[..8],
                            AuditAction::Logout,
                        )
                        .actor(session.user_id),
                    )
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Look up a credential by user id
    pub async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<Credential>> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT user_id, username, password_hash, created_at, last_login_at FROM credentials WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(CredentialRow::into_credential).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Credential>> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT user_id, username, password_hash, created_at, last_login_at FROM credentials WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CredentialRow::into_credential).transpose()
    }

    async fn record_login_failure(&self, username: &str, cause: &str) -> Result<()> {
        self.trail
            .append(
                AuditEvent::new("auth.login", "user", username, AuditAction::Login).failure(cause),
            )
            .await?;

        if let Some(lockout) = self.limiter.record_failure(username) {
            warn!(username = %username, lockout_secs = lockout.as_secs(), "Login lockout triggered");
            self.trail
                .append(
                    AuditEvent::new("auth.lockout", "user", username, AuditAction::Login)
                        .details(serde_json::json!({ "lockout_secs": lockout.as_secs() }))
                        .failure("too_many_failures"),
                )
                .await?;
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    user_id: String,
    username: String,
    password_hash: String,
    created_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl CredentialRow {
    fn into_credential(self) -> Result<Credential> {
        let user_id = Uuid::parse_str(&self.user_id)
            .map_err(|e| Error::Validation(format!("corrupt user id in credentials: {}", e)))?;
        Ok(Credential {
            user_id,
            username: self.username,
            password_hash: self.password_hash,
            created_at: self.created_at,
            last_login_at: self.last_login_at,
        })
    }
}
