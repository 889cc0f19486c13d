//! Injectable wall clock.
//!
//! Every time-dependent decision (observation instants, bucket freshness,
//! checkpoints, TTL eviction, coalescing deadlines) reads the engine's
//! [`Clock`], so tests drive time explicitly with [`ManualClock`].

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Source of the current instant.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(start.timestamp_micros()),
        }
    }

    /// Create a clock frozen at a Unix timestamp in milliseconds.
    #[must_use]
    pub fn at_millis(millis: i64) -> Self {
        Self {
            micros: AtomicI64::new(millis.saturating_mul(1_000)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let micros = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }

    /// Move the clock forward by whole milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Jump to an absolute instant (may move backwards).
    pub fn set(&self, at: DateTime<Utc>) {
        self.micros.store(at.timestamp_micros(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let micros = self.micros.load(Ordering::SeqCst);
        DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Convert a std duration into a chrono delta, saturating on overflow.
#[must_use]
pub fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::at_millis(1_700_000_000_000);
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);

        clock.advance_millis(1_500);
        assert_eq!(clock.now() - t0, TimeDelta::milliseconds(1_500));
    }

    #[test]
    fn manual_clock_can_jump_backwards() {
        let clock = ManualClock::at_millis(2_000);
        clock.set(DateTime::from_timestamp_millis(1_000).unwrap());
        assert_eq!(clock.now().timestamp_millis(), 1_000);
    }

    #[test]
    fn to_delta_saturates() {
        assert_eq!(to_delta(Duration::MAX), TimeDelta::MAX);
        assert_eq!(to_delta(Duration::from_secs(2)), TimeDelta::seconds(2));
    }
}
