//! Authentication: credentials, sessions, rate limiting
//!
//! - `password`: credential shape validation and argon2id hashing
//! - `session_store`: in-memory session arena with explicit eviction
//! - `rate_limit`: rolling-window failure tracking with escalating lockout
//! - `service`: register/login/validate/logout orchestration

pub mod password;
pub mod rate_limit;
pub mod service;
pub mod session_store;

pub use password::{validate_password_strength, validate_username, CredentialHasher};
pub use rate_limit::RateLimiter;
pub use service::{AuthenticationService, Credential};
pub use session_store::{Session, SessionLookup, SessionStore};
