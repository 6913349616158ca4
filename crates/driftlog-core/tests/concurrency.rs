//! Concurrent joins of the same data collapse into one unit of work.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use driftlog_core::{AppendOptions, Change, JoinOptions, JoinOutcome, Log, LogOptions, Storage};
use support::{InstrumentedBlocks, append, assert_head_invariant, memory_log, order, signer};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_thousand_joins_of_one_hash_fetch_once() {
    let author = signer();
    let entry = append(&author, "shared", 1, &[]);

    let blocks = Arc::new(InstrumentedBlocks::with_delay(Duration::from_millis(20)));
    blocks.preload(&[&entry]).await;

    let changes = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&changes);
    let log: Log<String> = Log::open(
        Storage::with_blocks(blocks.clone()).expect("storage"),
        signer(),
        LogOptions::default().with_on_change(move |_: &Change<String>| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .expect("open");

    let hash = entry.hash().to_owned();
    let tasks: Vec<_> = (0..1000)
        .map(|_| {
            let log = log.clone();
            let hash = hash.clone();
            tokio::spawn(async move { log.join_hashes(&[hash], JoinOptions::default()).await })
        })
        .collect();

    let mut inserted = 0;
    for task in tasks {
        let outcomes = task.await.expect("task").expect("join");
        assert_eq!(outcomes.len(), 1);
        if matches!(outcomes[0], JoinOutcome::Inserted { .. }) {
            inserted += 1;
        }
    }

    assert_eq!(blocks.gets_of(&hash), 1);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    assert_eq!(log.len(), 1);
    // Everyone awaiting the shared unit sees its outcome.
    assert!(inserted >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_all_land() {
    let log = memory_log();
    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let log = log.clone();
            tokio::spawn(async move { log.append(format!("{i}"), AppendOptions::default()).await })
        })
        .collect();
    for task in tasks {
        task.await.expect("task").expect("append");
    }

    assert_eq!(log.len(), 64);
    assert_head_invariant(&log);

    let replica = memory_log();
    replica.join_log(&log, JoinOptions::default()).await.expect("join");
    assert_eq!(order(&replica), order(&log));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_histories_join_concurrently() {
    let author = signer();
    let mut chain = vec![append(&author, "0", 1, &[])];
    for i in 1..50u64 {
        let next = append(&author, &format!("{i}"), i + 1, &[&chain[chain.len() - 1]]);
        chain.push(next);
    }

    let blocks = Arc::new(InstrumentedBlocks::with_delay(Duration::from_millis(1)));
    let refs: Vec<_> = chain.iter().collect();
    blocks.preload(&refs).await;
    let log: Log<String> = Log::open(
        Storage::with_blocks(blocks.clone()).expect("storage"),
        signer(),
        LogOptions::default(),
    )
    .expect("open");

    // Every task asks for a different tip; their ancestor walks overlap.
    let tasks: Vec<_> = (10..50)
        .step_by(10)
        .map(|tip| {
            let log = log.clone();
            let hash = chain[tip].hash().to_owned();
            tokio::spawn(async move { log.join_hashes(&[hash], JoinOptions::default()).await })
        })
        .collect();
    for task in tasks {
        task.await.expect("task").expect("join");
    }

    log.join_hashes(&[chain[49].hash().to_owned()], JoinOptions::default())
        .await
        .expect("tip");
    assert_eq!(log.len(), 50);
    assert_head_invariant(&log);
    let values: Vec<String> = log
        .to_array()
        .await
        .expect("array")
        .into_iter()
        .map(|e| e.value().clone())
        .collect();
    let expected: Vec<String> = (0..50).map(|i| format!("{i}")).collect();
    assert_eq!(values, expected);
}
