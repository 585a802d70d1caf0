use chrono::{DateTime, Utc};

/// Component A — monotonic wall-clock access, abstracted so tests can
/// control "now" instead of depending on real elapsed time.
///
/// Expiration and cache-staleness checks (`SessionStore::ExpiredActiveSessions`,
/// the constitution mtime cache) are computed against this clock at call
/// time, never cached, per spec.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock. Default for production wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fixed/advanceable clock for boundary-condition tests across every
/// crate (e.g. "exactly at the timeout", "one second over").
pub struct FixedClock(std::sync::Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(std::sync::Mutex::new(at))
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.0.lock().unwrap();
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}
