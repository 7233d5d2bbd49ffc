//! Wall-clock source for lease arithmetic.
//!
//! Every lease deadline in the mesh is computed and checked through a
//! [`Clock`]. Clones share the same offset so a test can move time forward
//! for all components at once.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Point in time used by node and addressable leases
pub type Timestamp = DateTime<Utc>;

/// Shared wall clock with a manually adjustable offset
#[derive(Debug, Clone, Default)]
pub struct Clock {
    offset_ms: Arc<AtomicI64>,
}

impl Clock {
    /// Create a clock that follows system time
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time including any manual offset
    pub fn now(&self) -> Timestamp {
        Utc::now() + chrono::Duration::milliseconds(self.offset_ms.load(Ordering::Acquire))
    }

    /// Move this clock (and all its clones) forward
    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::AcqRel);
    }

    /// `now + duration`, saturating on overflow
    pub fn after(&self, duration: Duration) -> Timestamp {
        let now = self.now();
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether `ts` lies strictly before now
    pub fn in_past(&self, ts: &Timestamp) -> bool {
        *ts < self.now()
    }

    /// Time left until `ts`, zero if already passed
    pub fn until(&self, ts: &Timestamp) -> Duration {
        (*ts - self.now()).to_std().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_offset() {
        let clock = Clock::new();
        let other = clock.clone();
        let before = other.now();

        clock.advance(Duration::from_secs(60));

        assert!(other.now() - before >= chrono::Duration::seconds(60));
    }

    #[test]
    fn test_in_past_and_until() {
        let clock = Clock::new();
        let deadline = clock.after(Duration::from_secs(10));
        assert!(!clock.in_past(&deadline));
        assert!(clock.until(&deadline) > Duration::from_secs(9));

        clock.advance(Duration::from_secs(11));
        assert!(clock.in_past(&deadline));
        assert_eq!(clock.until(&deadline), Duration::ZERO);
    }
}
