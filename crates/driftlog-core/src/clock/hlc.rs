//! Hybrid logical clock.
//!
//! [`Hlc::now`] returns a timestamp strictly greater than every timestamp the
//! instance has produced or observed. [`Hlc::update`] folds in a remote
//! timestamp so entries created after a join sort after everything joined.
//!
//! One `Hlc` is owned by each log; nothing here is process-global.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use super::Timestamp;
use super::skew::{ClockSkewWarning, DEFAULT_SKEW_THRESHOLD_MS, check_clock_skew, wall_clock_now_ns};

/// Source of physical wall time in nanoseconds.
pub type PhysicalClock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct Hlc {
    last: Mutex<Timestamp>,
    physical: PhysicalClock,
    skew_threshold_ms: u64,
}

impl fmt::Debug for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hlc")
            .field("last", &self.last())
            .field("skew_threshold_ms", &self.skew_threshold_ms)
            .finish_non_exhaustive()
    }
}

impl Default for Hlc {
    fn default() -> Self {
        Self::new()
    }
}

impl Hlc {
    /// Clock driven by the system wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_physical(Arc::new(wall_clock_now_ns))
    }

    /// Clock driven by a caller-supplied physical time source.
    #[must_use]
    pub fn with_physical(physical: PhysicalClock) -> Self {
        Self {
            last: Mutex::new(Timestamp::default()),
            physical,
            skew_threshold_ms: DEFAULT_SKEW_THRESHOLD_MS,
        }
    }

    #[must_use]
    pub fn with_skew_threshold(mut self, threshold_ms: u64) -> Self {
        self.skew_threshold_ms = threshold_ms;
        self
    }

    /// The most recent timestamp produced or observed.
    #[must_use]
    pub fn last(&self) -> Timestamp {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current physical wall time of the underlying source.
    #[must_use]
    pub fn physical_now(&self) -> u64 {
        (self.physical)()
    }

    /// Produce a new timestamp, strictly greater than any previous one.
    pub fn now(&self) -> Timestamp {
        let physical = (self.physical)();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);

        if physical > last.wall_time {
            *last = Timestamp::new(physical, 0);
        } else {
            *last = bump(*last);
        }
        *last
    }

    /// Fold an observed remote timestamp into local state.
    ///
    /// A remote wall time ahead of ours is adopted together with its counter;
    /// otherwise the counter advances past both. Returns a skew warning when
    /// the remote wall time is further ahead of physical time than the
    /// configured threshold.
    pub fn update(&self, remote: Timestamp) -> Option<ClockSkewWarning> {
        let physical = (self.physical)();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);

        match remote.wall_time.cmp(&last.wall_time) {
            std::cmp::Ordering::Greater => *last = remote,
            std::cmp::Ordering::Equal => {
                *last = bump(Timestamp::new(last.wall_time, last.logical.max(remote.logical)));
            }
            std::cmp::Ordering::Less => *last = bump(*last),
        }
        drop(last);

        check_clock_skew(remote.wall_time, physical, self.skew_threshold_ms)
    }
}

/// Advance the logical counter, spilling into wall time on overflow.
const fn bump(ts: Timestamp) -> Timestamp {
    match ts.logical.checked_add(1) {
        Some(logical) => Timestamp::new(ts.wall_time, logical),
        None => Timestamp::new(ts.wall_time.saturating_add(1), 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn fixed(ns: u64) -> (Arc<AtomicU64>, Hlc) {
        let time = Arc::new(AtomicU64::new(ns));
        let source = Arc::clone(&time);
        let hlc = Hlc::with_physical(Arc::new(move || source.load(Ordering::SeqCst)));
        (time, hlc)
    }

    #[test]
    fn now_is_strictly_monotonic_when_wall_time_stalls() {
        let (_time, hlc) = fixed(1_000);
        let a = hlc.now();
        let b = hlc.now();
        let c = hlc.now();
        assert!(a < b && b < c);
        assert_eq!(a.wall_time, 1_000);
        assert_eq!(c.logical, 2);
    }

    #[test]
    fn now_resets_counter_when_wall_time_advances() {
        let (time, hlc) = fixed(1_000);
        hlc.now();
        hlc.now();
        time.store(2_000, Ordering::SeqCst);
        assert_eq!(hlc.now(), Timestamp::new(2_000, 0));
    }

    #[test]
    fn now_survives_wall_clock_going_backwards() {
        let (time, hlc) = fixed(5_000);
        let before = hlc.now();
        time.store(1_000, Ordering::SeqCst);
        let after = hlc.now();
        assert!(after > before);
    }

    #[test]
    fn update_adopts_remote_time_ahead_of_local() {
        let (_time, hlc) = fixed(1_000);
        hlc.now();
        hlc.update(Timestamp::new(9_000, 4));
        assert_eq!(hlc.last(), Timestamp::new(9_000, 4));
        assert!(hlc.now() > Timestamp::new(9_000, 4));
    }

    #[test]
    fn update_with_older_remote_still_advances_counter() {
        let (_time, hlc) = fixed(5_000);
        let local = hlc.now();
        hlc.update(Timestamp::new(10, 99));
        assert_eq!(hlc.last(), Timestamp::new(local.wall_time, local.logical + 1));
    }

    #[test]
    fn update_with_equal_wall_takes_max_counter() {
        let (_time, hlc) = fixed(5_000);
        hlc.now();
        hlc.update(Timestamp::new(5_000, 7));
        assert_eq!(hlc.last(), Timestamp::new(5_000, 8));
    }

    #[test]
    fn update_reports_forward_skew() {
        let (_time, hlc) = fixed(0);
        let hlc = hlc.with_skew_threshold(1);
        let warning = hlc.update(Timestamp::new(10_000_000, 0));
        assert!(warning.is_some());
        assert!(hlc.update(Timestamp::new(0, 0)).is_none());
    }

    #[test]
    fn logical_overflow_spills_into_wall_time() {
        let ts = bump(Timestamp::new(7, u32::MAX));
        assert_eq!(ts, Timestamp::new(8, 0));
    }
}
