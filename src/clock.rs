//! Monotonic time source.
//!
//! Every TTL decision in the engine runs on [`MonoTime`], measured against
//! a steady process-local origin that is immune to wall-clock jumps. The
//! wall clock is captured once at engine start and only used to render
//! instants for reporting.

use std::ops::Add;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// An instant on the engine's monotonic timeline.
///
/// Internally the elapsed duration since the owning clock's origin, so it
/// is totally ordered and supports `+ Duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MonoTime(Duration);

impl MonoTime {
    pub const ZERO: MonoTime = MonoTime(Duration::ZERO);

    #[inline]
    pub fn as_duration(self) -> Duration {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    #[inline]
    pub fn saturating_since(self, earlier: MonoTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for MonoTime {
    type Output = MonoTime;

    #[inline]
    fn add(self, rhs: Duration) -> MonoTime {
        MonoTime(self.0.saturating_add(rhs))
    }
}

/// Process-local steady clock with a fixed UTC origin.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
    origin_utc: DateTime<Utc>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_utc: Utc::now(),
        }
    }

    #[inline]
    pub fn now(&self) -> MonoTime {
        MonoTime(self.origin.elapsed())
    }

    /// Render a monotonic instant as wall-clock time. Reporting only;
    /// never feeds back into expiration.
    pub fn to_utc(&self, t: MonoTime) -> DateTime<Utc> {
        self.origin_utc
            + chrono::Duration::from_std(t.0).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_non_decreasing() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn add_duration_orders_after() {
        let clock = MonotonicClock::new();
        let t = clock.now();
        assert!(t + Duration::from_millis(1) > t);
        assert_eq!(
            (t + Duration::from_secs(2)).saturating_since(t),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn utc_conversion_tracks_elapsed() {
        let clock = MonotonicClock::new();
        let t = clock.now() + Duration::from_secs(60);
        let wall = clock.to_utc(t);
        assert!(wall > clock.to_utc(MonoTime::ZERO));
    }
}
