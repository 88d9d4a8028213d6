//! Clock abstraction so time-dependent logic (hold expiry, timestamps) is
//! deterministic under test.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock returning a fixed, manually advanceable instant
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock frozen at `now`
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Advances the clock by `delta`
    pub fn advance(&self, delta: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += delta;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(Utc::now());
        let before = clock.now();
        clock.advance(Duration::minutes(10));
        assert_eq!(clock.now() - before, Duration::minutes(10));
    }
}
