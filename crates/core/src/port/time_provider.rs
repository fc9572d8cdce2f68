// Time Provider Port (for testability)

use std::sync::atomic::{AtomicI64, Ordering};

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for tests of delays, backoff and lock expiry
pub struct ManualTimeProvider {
    now: AtomicI64,
}

impl ManualTimeProvider {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualTimeProvider::new(1_000);
        clock.advance(250);
        assert_eq!(clock.now_millis(), 1_250);
        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }
}
