//! Game clock used for latency-compensation timestamps and receipt diagnostics.
//!
//! Game time is the time elapsed since the game started. Outbound timestamps are
//! expressed in microseconds, i.e. 100-nanosecond ticks divided by 10.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of game time and wall-clock time
pub trait GameClock: Send + Sync {
    /// Time elapsed since the game started
    fn game_time(&self) -> Duration;

    /// Wall-clock time since the Unix epoch
    fn unix_time(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// Convert a duration to whole microseconds, saturating at `i64::MAX`
#[inline]
pub fn to_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Monotonic clock that starts counting at construction
#[derive(Debug, Clone)]
pub struct SystemGameClock {
    start: Instant,
}

impl SystemGameClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemGameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl GameClock for SystemGameClock {
    fn game_time(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Clock whose game time only moves when told to. Used by tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    pub fn set(&self, time: Duration) {
        let micros = u64::try_from(time.as_micros()).unwrap_or(u64::MAX);
        self.micros.store(micros, Ordering::Release);
    }

    pub fn advance(&self, delta: Duration) {
        let micros = u64::try_from(delta.as_micros()).unwrap_or(u64::MAX);
        self.micros.fetch_add(micros, Ordering::AcqRel);
    }
}

impl GameClock for ManualClock {
    fn game_time(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_micros_truncates_sub_microsecond() {
        assert_eq!(to_micros(Duration::from_nanos(1_999)), 1);
        assert_eq!(to_micros(Duration::from_secs(2)), 2_000_000);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(Duration::from_millis(5));
        clock.advance(Duration::from_micros(250));
        assert_eq!(clock.game_time(), Duration::from_micros(5_250));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemGameClock::new();
        let a = clock.game_time();
        let b = clock.game_time();
        assert!(b >= a);
        assert!(clock.unix_time() > Duration::ZERO);
    }
}
