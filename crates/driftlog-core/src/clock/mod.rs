//! Logical time for log entries.
//!
//! Every entry carries a [`Clock`]: the owner's identity bytes plus an
//! [`Timestamp`] produced by the log's [`Hlc`]. Clocks compare by timestamp
//! first and fall back to the owner id only to break exact timestamp ties.
//!
//! # Sub-modules
//!
//! - [`hlc`]: Hybrid logical clock generator ([`Hlc`]).
//! - [`skew`]: Clock skew detection for observed remote timestamps.

pub mod hlc;
pub mod skew;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use hlc::{Hlc, PhysicalClock};
pub use skew::{ClockSkewWarning, DEFAULT_SKEW_THRESHOLD_MS};

/// Hybrid logical timestamp: wall time in nanoseconds plus a logical counter.
///
/// Ordering is lexicographic over `(wall_time, logical)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Nanoseconds since the Unix epoch.
    pub wall_time: u64,
    /// Counter disambiguating timestamps that share a wall time.
    pub logical: u32,
}

impl Timestamp {
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_time, self.logical)
    }
}

/// Lamport-style clock attached to an entry: owner identity + timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clock {
    /// Owner identity bytes (the first signer's public key).
    pub id: Vec<u8>,
    pub timestamp: Timestamp,
}

impl Clock {
    #[must_use]
    pub const fn new(id: Vec<u8>, timestamp: Timestamp) -> Self {
        Self { id, timestamp }
    }

    /// Compare timestamps only.
    #[must_use]
    pub fn compare_time(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }

    /// Compare owner ids only (byte-lexicographic).
    #[must_use]
    pub fn compare_id(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Ord for Clock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_time(other)
            .then_with(|| self.compare_id(other))
    }
}

impl PartialOrd for Clock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
