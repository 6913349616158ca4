#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use driftlog_core::blocks::{Blocks, GetOptions, MemoryBlocks};
use driftlog_core::clock::Timestamp;
use driftlog_core::entry::{Entry, EntryType, Identity, NewEntry, NextRef, generate_identity};
use driftlog_core::{Log, LogOptions, Result, Storage};

pub fn signer() -> Arc<dyn Identity> {
    Arc::new(generate_identity())
}

pub fn memory_log() -> Log<String> {
    Log::open(Storage::Memory, signer(), LogOptions::default()).expect("open log")
}

pub fn log_with(options: LogOptions<String>) -> Log<String> {
    Log::open(Storage::Memory, signer(), options).expect("open log")
}

/// Build an entry by hand with a fixed timestamp.
pub fn entry(
    signer: &Arc<dyn Identity>,
    data: &str,
    wall: u64,
    next: &[&Entry<String>],
    entry_type: EntryType,
) -> Entry<String> {
    Entry::build(NewEntry {
        data: data.to_owned(),
        signers: std::slice::from_ref(signer),
        timestamp: Timestamp::new(wall, 0),
        next: next.iter().map(|e| NextRef::from(*e)).collect(),
        gid_seed: None,
        entry_type,
        meta_data: None,
    })
    .expect("build entry")
}

pub fn append(
    signer: &Arc<dyn Identity>,
    data: &str,
    wall: u64,
    next: &[&Entry<String>],
) -> Entry<String> {
    entry(signer, data, wall, next, EntryType::Append)
}

pub fn cut(signer: &Arc<dyn Identity>, wall: u64, targets: &[&Entry<String>]) -> Entry<String> {
    entry(signer, "", wall, targets, EntryType::Cut)
}

/// Hashes in log order.
pub fn order<T>(log: &Log<T>) -> Vec<String> {
    log.values()
        .expect("values")
        .into_iter()
        .map(|e| e.hash)
        .collect()
}

pub fn head_set<T>(log: &Log<T>) -> BTreeSet<String> {
    log.heads(None)
        .collect_all()
        .expect("heads")
        .into_iter()
        .map(|e| e.hash)
        .collect()
}

/// Every entry is a head iff no indexed non-CUT entry lists it as a parent.
pub fn assert_head_invariant<T>(log: &Log<T>) {
    let values = log.values().expect("values");
    let live_parents: HashSet<&str> = values
        .iter()
        .filter(|e| !e.meta.is_cut())
        .flat_map(|e| e.meta.next.iter().map(String::as_str))
        .collect();
    for entry in &values {
        assert_eq!(
            entry.head,
            !live_parents.contains(entry.hash.as_str()),
            "head flag of {} disagrees with its referrers",
            entry.hash
        );
    }
}

/// Block store wrapper that counts fetches per hash and can slow or stall
/// them.
#[derive(Default)]
pub struct InstrumentedBlocks {
    inner: MemoryBlocks,
    gets: Mutex<HashMap<String, usize>>,
    total_gets: AtomicUsize,
    delay: Option<Duration>,
    stalled: Mutex<HashSet<String>>,
}

impl InstrumentedBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Fetches of `hash` never complete.
    pub fn stall(&self, hash: &str) {
        self.stalled.lock().expect("lock").insert(hash.to_owned());
    }

    pub fn gets_of(&self, hash: &str) -> usize {
        self.gets.lock().expect("lock").get(hash).copied().unwrap_or(0)
    }

    pub fn total_gets(&self) -> usize {
        self.total_gets.load(Ordering::SeqCst)
    }

    pub async fn preload(&self, entries: &[&Entry<String>]) {
        for entry in entries {
            self.inner
                .put(entry.to_bytes().expect("bytes"))
                .await
                .expect("put");
        }
    }
}

#[async_trait::async_trait]
impl Blocks for InstrumentedBlocks {
    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        self.inner.put(bytes).await
    }

    async fn get(&self, hash: &str, options: GetOptions) -> Result<Option<Vec<u8>>> {
        *self
            .gets
            .lock()
            .expect("lock")
            .entry(hash.to_owned())
            .or_default() += 1;
        self.total_gets.fetch_add(1, Ordering::SeqCst);

        let stalled = self.stalled.lock().expect("lock").contains(hash);
        if stalled {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get(hash, options).await
    }

    async fn rm(&self, hash: &str) -> Result<()> {
        self.inner.rm(hash).await
    }

    async fn has(&self, hash: &str) -> Result<bool> {
        self.inner.has(hash).await
    }

    async fn iter(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.inner.iter().await
    }
}

/// Claims someone else's public key but signs with its own.
pub struct Forger {
    pub key: ed25519_dalek::SigningKey,
    pub victim: Vec<u8>,
}

impl Identity for Forger {
    fn public_key(&self) -> Vec<u8> {
        self.victim.clone()
    }

    fn sign(&self, bytes: &[u8]) -> driftlog_core::entry::Signature {
        let mut signature = Identity::sign(&self.key, bytes);
        signature.public_key = self.victim.clone();
        signature
    }
}
