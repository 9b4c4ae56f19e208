//! Login rate limiting
//!
//! Tracks failed login attempts per username over a rolling window and
//! applies an escalating lockout once the threshold is crossed. Counters are
//! in-memory only; losing them on restart is acceptable because their role
//! is burst mitigation, not a hard security boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default rolling window for counting failures
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// Default number of failures tolerated within the window
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// Default first lockout duration; doubles on each further lockout
pub const DEFAULT_BASE_LOCKOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct FailureRecord {
    failures: Vec<Instant>,
    lockout_count: u32,
    locked_until: Option<Instant>,
}

/// Per-username failure tracker with escalating lockout
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_failures: u32,
    base_lockout: Duration,
    records: Arc<Mutex<HashMap<String, FailureRecord>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_failures: u32, base_lockout: Duration) -> Self {
        Self {
            window,
            max_failures,
            base_lockout,
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Remaining lockout for a username, if it is currently locked out
    pub fn lockout_remaining(&self, username: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut records = self.records.lock().expect("rate limiter lock poisoned");
        let record = records.get_mut(username)?;
        match record.locked_until {
            Some(until) if until > now => Some(until - now),
            _ => None,
        }
    }

    /// Record a failed attempt; returns the lockout duration if this attempt
    /// crossed the threshold
    pub fn record_failure(&self, username: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut records = self.records.lock().expect("rate limiter lock poisoned");
        let record = records.entry(username.to_string()).or_default();

        record.failures.retain(|t| now.duration_since(*t) < self.window);
        record.failures.push(now);

        if record.failures.len() as u32 >= self.max_failures {
            record.lockout_count += 1;
            // Escalate: 1x, 2x, 4x... the base lockout.
            let factor = 1u32 << (record.lockout_count - 1).min(6);
            let lockout = self.base_lockout * factor;
            record.locked_until = Some(now + lockout);
            record.failures.clear();
            Some(lockout)
        } else {
            None
        }
    }

    /// Clear the failure history after a successful login
    pub fn record_success(&self, username: &str) {
        let mut records = self.records.lock().expect("rate limiter lock poisoned");
        records.remove(username);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_FAILURES, DEFAULT_BASE_LOCKOUT)
    }
}
