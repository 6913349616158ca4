use std::time::{SystemTime, UNIX_EPOCH};

/// Warning emitted when a remote timestamp runs ahead of local wall time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockSkewWarning {
    /// The observed remote wall time (nanoseconds).
    pub remote_ns: u64,
    /// Local physical wall time when the remote timestamp was observed.
    pub local_ns: u64,
    /// Detected skew in milliseconds (positive = remote is in the future).
    pub skew_ms: i64,
    /// The threshold that was exceeded.
    pub threshold_ms: u64,
}

impl std::fmt::Display for ClockSkewWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let direction = if self.skew_ms > 0 { "future" } else { "past" };
        write!(
            f,
            "clock skew detected: remote timestamp is {}ms in the {direction}, threshold is {}ms",
            self.skew_ms.unsigned_abs(),
            self.threshold_ms
        )
    }
}

/// Default skew threshold in milliseconds (5 minutes).
pub const DEFAULT_SKEW_THRESHOLD_MS: u64 = 300_000;

/// Current wall-clock time as nanoseconds since the Unix epoch.
///
/// A system clock set before the epoch reads as zero.
#[must_use]
pub fn wall_clock_now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

/// Check an observed remote wall time against local physical time.
///
/// Only forward skew is reported: remote entries from the past are normal
/// (late delivery). Timestamps are never rejected because of skew; the HLC
/// folds them in regardless.
#[must_use]
pub fn check_clock_skew(
    remote_ns: u64,
    local_ns: u64,
    threshold_ms: u64,
) -> Option<ClockSkewWarning> {
    if remote_ns <= local_ns {
        return None;
    }
    let ahead_ms = (remote_ns - local_ns) / 1_000_000;
    if ahead_ms <= threshold_ms {
        return None;
    }

    Some(ClockSkewWarning {
        remote_ns,
        local_ns,
        skew_ms: i64::try_from(ahead_ms).unwrap_or(i64::MAX),
        threshold_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    #[test]
    fn test_no_skew() {
        assert!(check_clock_skew(1_050 * MS, 1_000 * MS, 100).is_none());
    }

    #[test]
    fn test_future_skew() {
        let warning = check_clock_skew(1_200 * MS, 1_000 * MS, 100).expect("skew warning");
        assert_eq!(warning.skew_ms, 200);
        assert!(warning.to_string().contains("future"));
    }

    #[test]
    fn test_past_timestamps_are_not_skew() {
        assert!(check_clock_skew(800 * MS, 1_000 * MS, 100).is_none());
    }
}
