// =============================================================================
// Clock — the time source `ensure_consistency` reads "now" from
// =============================================================================
//
// Grounded on the simulation-clock pattern used for deterministic backtests
// elsewhere in the corpus: production code reads wall-clock time through a
// `SystemClock`, while a replay run substitutes a clock driven by the
// timestamps already stamped on each historical tick, so freshness checks
// compare a candle's `start` against the same "now" the tick that produced
// it carried — not the wall-clock instant the replay happens to run at.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// A source of "now". Implementors must be cheap to call — this sits on the
/// hot path of every `ensure_consistency` check.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads real wall-clock time. The default for live operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A single process-wide `SystemClock` instance, for callers that need a
/// `&'static dyn Clock` without constructing one.
pub static SYSTEM_CLOCK: SystemClock = SystemClock;

/// A clock whose "now" is set explicitly rather than read from the system.
/// `ReplayFeed` advances this to each tick's own timestamp as it replays a
/// recorded file, so the rest of the pipeline sees a "now" consistent with
/// the historical data it is processing.
#[derive(Debug, Default)]
pub struct ReplayClock {
    current: RwLock<DateTime<Utc>>,
}

impl ReplayClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(start),
        }
    }

    /// Move the clock to `at`. Replay ticks are expected to arrive in
    /// non-decreasing timestamp order; a caller driving this from
    /// out-of-order data will simply make `now()` jump around rather than
    /// error, since nothing here depends on monotonicity for correctness.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.write() = at;
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn system_clock_tracks_real_time() {
        let before = Utc::now();
        let reading = SystemClock.now();
        let after = Utc::now();
        assert!(reading >= before && reading <= after);
    }

    #[test]
    fn replay_clock_starts_at_the_given_instant() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let clock = ReplayClock::new(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn replay_clock_advances_on_set() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 0).unwrap();
        let clock = ReplayClock::new(start);
        clock.set(later);
        assert_eq!(clock.now(), later);
    }
}
