//! Wall-clock source used to stamp ingress and to evaluate fees.

use crate::window::TimestampMs;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_ms(&self) -> TimestampMs {
        self.now().timestamp_millis()
    }

    fn now_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug)]
pub struct ManualClock {
    ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: TimestampMs) -> Self {
        Self {
            ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    /// Start at a whole number of seconds since the epoch.
    pub fn at_secs(secs: i64) -> Self {
        Self::new(secs.saturating_mul(1_000))
    }

    pub fn set_ms(&self, ms: TimestampMs) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, by: Duration) {
        self.ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.ms.load(Ordering::SeqCst)).unwrap_or_default()
    }

    fn now_ms(&self) -> TimestampMs {
        self.ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::at_secs(1_000);
        let shared = clock.clone();
        assert_eq!(clock.now_secs(), 1_000);
        shared.advance(Duration::from_secs(650));
        assert_eq!(clock.now_secs(), 1_650);
        assert_eq!(clock.now_ms(), 1_650_000);
    }
}
