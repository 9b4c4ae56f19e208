//! In-memory session arena
//!
//! Sessions live only in process memory: created on login, destroyed on
//! logout, expiry or restart. Lookup and eviction happen under one lock so
//! an expiring session resolves deterministically for every caller.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Session token size in bytes (256 bits of entropy)
const TOKEN_SIZE: usize = 32;

/// An authenticated session
#[derive(Debug, Clone)]
pub struct Session {
    /// High-entropy random token, hex encoded
    pub session_id: String,
    /// Owning user
    pub user_id: Uuid,
    /// When the session was issued
    pub created_at: DateTime<Utc>,
    /// When the session stops being valid
    pub expires_at: DateTime<Utc>,
    /// Client address, when supplied by the caller
    pub ip_address: Option<String>,
    /// Client user agent, when supplied by the caller
    pub user_agent: Option<String>,
}

impl Session {
    /// Whether the session has passed its expiry instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Result of a session lookup
///
/// `Expired` carries the evicted session so the caller can audit the expiry
/// as an event distinct from logout.
#[derive(Debug, Clone)]
pub enum SessionLookup {
    /// Session is present and still valid
    Valid(Session),
    /// Session existed but expired; it has been evicted
    Expired(Session),
    /// No such session
    Missing,
}

/// Concurrency-safe in-memory session map
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store issuing sessions with the given time to live
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Issue a new session for the user
    pub fn create(
        &self,
        user_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Session {
        let mut token = [0u8; TOKEN_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut token);

        let now = Utc::now();
        let session = Session {
            session_id: hex::encode(token),
            user_id,
            created_at: now,
            expires_at: now + self.ttl,
            ip_address,
            user_agent,
        };

        self.sessions
            .lock()
            .expect("session store lock poisoned")
            .insert(session.session_id.clone(), session.clone());
        session
    }

    /// Look up a session, evicting it if expired
    pub fn lookup(&self, session_id: &str) -> SessionLookup {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        match sessions.get(session_id) {
            Some(session) if session.is_expired_at(now) => {
                let evicted = sessions.remove(session_id).expect("present under lock");
                SessionLookup::Expired(evicted)
            }
            Some(session) => SessionLookup::Valid(session.clone()),
            None => SessionLookup::Missing,
        }
    }

    /// Remove a session; false if it was already gone
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .expect("session store lock poisoned")
            .remove(session_id)
    }

    /// Evict every expired session, returning the evicted set
    pub fn evict_expired(&self) -> Vec<Session> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let expired_ids: Vec<String> = sessions
            .values()
            .filter(|s| s.is_expired_at(now))
            .map(|s| s.session_id.clone())
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|id| sessions.remove(&id))
            .collect()
    }

    /// Number of live (possibly expired but not yet evicted) sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session store lock poisoned").len()
    }

    /// Whether the store holds no sessions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_entropy_and_uniqueness() {
        let store = SessionStore::new(Duration::minutes(30));
        let a = store.create(Uuid::new_v4(), None, None);
        let b = store.create(Uuid::new_v4(), None, None);

        assert_eq!(a.session_id.len(), TOKEN_SIZE * 2);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_lookup_valid_session() {
        let store = SessionStore::new(Duration::minutes(30));
        let session = store.create(Uuid::new_v4(), Some("127.0.0.1".into()), None);

        match store.lookup(&session.session_id) {
            SessionLookup::Valid(found) => {
                assert_eq!(found.user_id, session.user_id);
                assert_eq!(found.ip_address.as_deref(), Some("127.0.0.1"));
            }
            other => panic!("expected valid session, got {:?}", other),
        }
    }

    #[test]
    fn test_expired_session_is_evicted_once() {
        // Negative TTL makes the session already expired at creation.
        let store = SessionStore::new(Duration::seconds(-1));
        let session = store.create(Uuid::new_v4(), None, None);

        assert!(matches!(
            store.lookup(&session.session_id),
            SessionLookup::Expired(_)
        ));
        // Second lookup: already evicted.
        assert!(matches!(
            store.lookup(&session.session_id),
            SessionLookup::Missing
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_session_valid_just_before_expiry() {
        let store = SessionStore::new(Duration::seconds(1));
        let session = store.create(Uuid::new_v4(), None, None);
        // Within the 1s window, the session is still valid.
        assert!(matches!(
            store.lookup(&session.session_id),
            SessionLookup::Valid(_)
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = SessionStore::new(Duration::minutes(30));
        let session = store.create(Uuid::new_v4(), None, None);

        assert!(store.remove(&session.session_id).is_some());
        assert!(store.remove(&session.session_id).is_none());
    }

    #[test]
    fn test_evict_expired_sweep() {
        let expired = SessionStore::new(Duration::seconds(-1));
        expired.create(Uuid::new_v4(), None, None);
        expired.create(Uuid::new_v4(), None, None);

        let evicted = expired.evict_expired();
        assert_eq!(evicted.len(), 2);
        assert!(expired.is_empty());
    }
}
