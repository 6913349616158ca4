#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use driftlog_core::clock::Timestamp;
use driftlog_core::entry::{Entry, EntryType, Identity, NewEntry, NextRef, generate_identity};

#[derive(Clone, Copy, Debug)]
pub struct BenchmarkTier {
    pub name: &'static str,
    pub entry_count: usize,
    /// Number of concurrent writers whose chains interleave.
    pub writers: usize,
}

pub const TIER_S: BenchmarkTier = BenchmarkTier {
    name: "S",
    entry_count: 100,
    writers: 2,
};

pub const TIER_M: BenchmarkTier = BenchmarkTier {
    name: "M",
    entry_count: 1_000,
    writers: 4,
};

pub const TIER_L: BenchmarkTier = BenchmarkTier {
    name: "L",
    entry_count: 5_000,
    writers: 8,
};

pub const TIERS: [BenchmarkTier; 3] = [TIER_S, TIER_M, TIER_L];

#[derive(Clone, Copy, Debug)]
pub struct LatencySummary {
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

/// Pre-built history: `writers` chains that merge every tenth entry.
#[derive(Debug)]
pub struct SyntheticHistory {
    pub tier: BenchmarkTier,
    pub entries: Vec<Entry<String>>,
}

pub fn generate_history(tier: BenchmarkTier) -> SyntheticHistory {
    let signers: Vec<Arc<dyn Identity>> = (0..tier.writers)
        .map(|_| Arc::new(generate_identity()) as Arc<dyn Identity>)
        .collect();
    let mut tips: Vec<Option<NextRef>> = vec![None; tier.writers];
    let mut entries = Vec::with_capacity(tier.entry_count);

    for i in 0..tier.entry_count {
        let writer = i % tier.writers;
        let next: Vec<NextRef> = if i % 10 == 9 {
            tips.iter().flatten().cloned().collect()
        } else {
            tips[writer].iter().cloned().collect()
        };
        let entry = Entry::build(NewEntry {
            data: format!("entry-{i}"),
            signers: std::slice::from_ref(&signers[writer]),
            timestamp: Timestamp::new(i as u64 + 1, 0),
            next,
            gid_seed: None,
            entry_type: EntryType::Append,
            meta_data: None,
        })
        .expect("build entry");
        tips[writer] = Some(NextRef::from(&entry));
        entries.push(entry);
    }

    SyntheticHistory { tier, entries }
}

pub fn sample_latencies(iterations: usize, mut op: impl FnMut()) -> Vec<Duration> {
    let mut samples = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        op();
        samples.push(start.elapsed());
    }
    samples
}

pub fn summarize_latencies(samples: &[Duration]) -> LatencySummary {
    assert!(!samples.is_empty(), "at least one sample is required");

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    LatencySummary {
        p50: percentile(&sorted, 50),
        p95: percentile(&sorted, 95),
        p99: percentile(&sorted, 99),
    }
}

fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    let rank = (sorted.len() * pct).div_ceil(100).max(1) - 1;
    sorted[rank.min(sorted.len() - 1)]
}
