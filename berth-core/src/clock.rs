//! Wall-clock abstraction for testability
//!
//! Grace windows on stopped VMs are measured against `Clock::now`, so tests
//! can move time instead of sleeping.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt::Debug;

/// Abstraction for reading the current time
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock using system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for deterministic testing
#[derive(Debug)]
pub struct MockClock {
    current: RwLock<DateTime<Utc>>,
}

impl MockClock {
    /// Create a mock clock frozen at `start`
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(start),
        }
    }

    /// Advance time by duration
    pub fn advance(&self, by: chrono::Duration) {
        *self.current.write() += by;
    }

    /// Set absolute time
    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.write() = to;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_advances() {
        let start = Utc::now();
        let clock = MockClock::at(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now() - start, chrono::Duration::minutes(5));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
