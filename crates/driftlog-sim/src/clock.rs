use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use driftlog_core::clock::PhysicalClock;
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

const NANOS_PER_MILLI: u64 = 1_000_000;

/// How agent clocks are spread out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Shared starting wall time in milliseconds.
    pub base_millis: u64,
    /// Wall time that passes per simulation round.
    pub tick_millis: u64,
    /// Largest drift, in parts per million, given to any agent.
    pub max_abs_drift_ppm: i32,
    /// Largest constant offset, in milliseconds, given to any agent.
    pub max_abs_skew_millis: i64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            base_millis: 1_700_000_000_000,
            tick_millis: 100,
            max_abs_drift_ppm: 100,
            max_abs_skew_millis: 25,
        }
    }
}

impl ClockConfig {
    /// Draw one agent's clock from the configured spread.
    #[must_use]
    pub fn assign(&self, rng: &mut DeterministicRng) -> ClockSpec {
        ClockSpec {
            base_millis: self.base_millis,
            tick_millis: self.tick_millis,
            drift_ppm: symmetric(rng, i64::from(self.max_abs_drift_ppm))
                .try_into()
                .unwrap_or(0),
            skew_millis: symmetric(rng, self.max_abs_skew_millis),
        }
    }
}

fn symmetric(rng: &mut DeterministicRng, max_abs: i64) -> i64 {
    let span = max_abs.unsigned_abs().saturating_mul(2).saturating_add(1);
    let draw = i64::try_from(rng.next_bounded(span)).unwrap_or(0);
    draw - max_abs.abs()
}

/// One agent's clock parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSpec {
    pub base_millis: u64,
    pub tick_millis: u64,
    pub drift_ppm: i32,
    pub skew_millis: i64,
}

/// Drifting, skewed, freezable wall clock, read by the agent's log through
/// [`SimulatedClock::physical_clock`].
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    spec: ClockSpec,
    frozen_at: Option<u64>,
    now_nanos: Arc<AtomicU64>,
}

impl SimulatedClock {
    #[must_use]
    pub fn new(spec: ClockSpec) -> Self {
        let clock = Self {
            spec,
            frozen_at: None,
            now_nanos: Arc::new(AtomicU64::new(0)),
        };
        clock.advance(0);
        clock
    }

    #[must_use]
    pub const fn spec(&self) -> ClockSpec {
        self.spec
    }

    /// Wall time in milliseconds at `round`.
    #[must_use]
    pub fn now_millis(&self, round: u64) -> u64 {
        if let Some(frozen) = self.frozen_at {
            return frozen;
        }

        let progress =
            i64::try_from(self.spec.tick_millis.saturating_mul(round)).unwrap_or(i64::MAX);
        let drift = progress
            .saturating_mul(i64::from(self.spec.drift_ppm))
            .saturating_div(1_000_000);
        let offset = self.spec.skew_millis.saturating_add(drift);
        self.spec
            .base_millis
            .saturating_add(u64::try_from(progress).unwrap_or(0))
            .saturating_add_signed(offset)
    }

    /// Move the clock the log sees to `round`.
    pub fn advance(&self, round: u64) {
        let nanos = self.now_millis(round).saturating_mul(NANOS_PER_MILLI);
        self.now_nanos.store(nanos, Ordering::SeqCst);
    }

    pub fn freeze(&mut self, round: u64) {
        self.frozen_at = Some(self.now_millis(round));
    }

    pub const fn unfreeze(&mut self) {
        self.frozen_at = None;
    }

    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }

    /// Physical time source for an HLC, in nanoseconds.
    #[must_use]
    pub fn physical_clock(&self) -> PhysicalClock {
        let now = Arc::clone(&self.now_nanos);
        Arc::new(move || now.load(Ordering::SeqCst))
    }
}
