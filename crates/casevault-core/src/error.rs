//! Error types for casevault

use thiserror::Error;

/// Result type alias using casevault's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Casevault error types
///
/// Authentication failures carry a deliberately generic user-facing message;
/// the specific cause is recorded in the audit trail only. Cryptographic and
/// integrity failures are never downgraded to warnings.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (E100-E199) - fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Cryptography errors (E200-E299)
    #[error("Decryption failed: data may be corrupted")]
    Decryption,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    // Validation errors (E300-E399)
    #[error("Invalid input: {0}")]
    Validation(String),

    // Authentication errors (E400-E499)
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Too many failed login attempts. Try again later.")]
    RateLimited,

    #[error("A user with this name already exists")]
    UsernameTaken,

    // Authorization errors (E500-E599)
    #[error("Missing or revoked consent: {0}")]
    ConsentRequired(String),

    // Integrity errors (E600-E699)
    #[error("Audit chain integrity violation at entry {entry_id}")]
    Integrity { entry_id: String },

    // Transaction errors (E700-E799)
    #[error("Operation failed in table '{table}' after {rows_affected} rows; rolled back")]
    Transaction { table: String, rows_affected: u64 },

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "E100",
            Self::Decryption => "E200",
            Self::Encryption(_) => "E201",
            Self::Validation(_) => "E300",
            Self::InvalidCredentials => "E400",
            Self::RateLimited => "E401",
            Self::UsernameTaken => "E402",
            Self::ConsentRequired(_) => "E500",
            Self::Integrity { .. } => "E600",
            Self::Transaction { .. } => "E700",
            Self::Database(_) => "E800",
            Self::Io(_) => "E900",
        }
    }

    /// Whether this error should abort application startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
