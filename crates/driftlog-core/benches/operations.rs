mod support;

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use driftlog_core::entry::generate_identity;
use driftlog_core::{AppendOptions, JoinOptions, Log, LogOptions, Storage};
use support::{SyntheticHistory, TIERS, generate_history, sample_latencies, summarize_latencies};
use tokio::runtime::Runtime;

fn open() -> Log<String> {
    Log::open(
        Storage::Memory,
        Arc::new(generate_identity()),
        LogOptions::default(),
    )
    .expect("open log")
}

fn bench_operations(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("operations.tiered");
    group.sample_size(10);

    for tier in TIERS {
        let history = generate_history(tier);
        group.throughput(Throughput::Elements(history.entries.len() as u64));

        group.bench_with_input(BenchmarkId::new("append", tier.name), &history, |b, history| {
            b.iter(|| black_box(runtime.block_on(append_all(history))));
        });

        group.bench_with_input(BenchmarkId::new("join", tier.name), &history, |b, history| {
            b.iter(|| black_box(runtime.block_on(join_all(history))));
        });

        let joined = runtime.block_on(join_all(&history));
        group.bench_with_input(BenchmarkId::new("iterate", tier.name), &joined, |b, log| {
            b.iter(|| black_box(log.values().expect("values").len()));
        });

        emit_latency_report(&runtime, &history);
    }

    group.finish();
}

async fn append_all(history: &SyntheticHistory) -> Log<String> {
    let log = open();
    for entry in &history.entries {
        log.append(entry.value().clone(), AppendOptions::default())
            .await
            .expect("append");
    }
    log
}

async fn join_all(history: &SyntheticHistory) -> Log<String> {
    let log = open();
    log.join(history.entries.clone(), JoinOptions::default())
        .await
        .expect("join");
    log
}

fn emit_latency_report(runtime: &Runtime, history: &SyntheticHistory) {
    let log = open();
    let mut pending = history.entries.iter();
    let join = summarize_latencies(&sample_latencies(64.min(history.entries.len()), || {
        if let Some(entry) = pending.next() {
            black_box(
                runtime
                    .block_on(log.join(vec![entry.clone()], JoinOptions::default()))
                    .expect("join"),
            );
        }
    }));
    let append = summarize_latencies(&sample_latencies(64, || {
        black_box(
            runtime
                .block_on(log.append("x".to_owned(), AppendOptions::default()))
                .expect("append"),
        );
    }));

    let tier = history.tier.name;
    eprintln!(
        "SLO tier={tier} op=join p50={:?} p95={:?} p99={:?}",
        join.p50, join.p95, join.p99
    );
    eprintln!(
        "SLO tier={tier} op=append p50={:?} p95={:?} p99={:?}",
        append.p50, append.p95, append.p99
    );
}

criterion_group!(benches, bench_operations);
criterion_main!(benches);
