//! The log: append, join, tombstones, trimming, and load/recover over one
//! [`EntryIndex`].
//!
//! A [`Log`] is a cheap handle (`Arc` inside). Any number of tasks may call
//! [`Log::append`] and the join family concurrently; there is no log-wide
//! lock. Joins of the same hash collapse into one unit of work through the
//! in-flight map in [`join`], and re-joining an indexed hash is a no-op, so
//! concurrent and repeated deliveries converge.
//!
//! # Mutation pipeline
//!
//! Every insert, from append or join, runs the same tail:
//!
//! 1. index the shallow projection (parents lose their head flag)
//! 2. for a CUT, delete its targets and their exclusive ancestors
//! 3. apply the configured [`TrimPolicy`]
//! 4. report a [`Change`] and any gids left without heads or live entries

mod join;
mod load;
mod options;
mod prune;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, Shared};
use rand::Rng;
use tracing::{debug, warn};

use crate::blocks::Blocks;
use crate::clock::{Hlc, Timestamp};
use crate::config::LogConfig;
use crate::entry::{Entry, EntryType, Identity, NewEntry, NextRef, ShallowEntry, Value};
use crate::error::{Error, Result};
use crate::hash::short;
use crate::index::{Direction, EntryIndex, PutOptions, ResolveOptions, SortedIter};
use crate::sort::Sorting;
use crate::trim::{self, CanTrim, TrimPolicy};

use prune::Prune;

pub use options::{
    AppendOptions, Appended, CanAppend, Change, JoinOptions, JoinOutcome, LoadOptions,
    LoadReport, LogOptions, OnChange, OnGidRemoved, SkipReason, Storage,
};

type PendingJoin<T> = Shared<BoxFuture<'static, Result<JoinOutcome<T>>>>;

/// A replicated append-only log of `T` values.
pub struct Log<T> {
    inner: Arc<LogInner<T>>,
}

impl<T> Clone for Log<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Log<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log")
            .field("id", &self.inner.id_string)
            .field("length", &self.inner.index.len())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct LogInner<T> {
    id: [u8; 32],
    id_string: String,
    identity: Arc<dyn Identity>,
    index: EntryIndex<T>,
    hlc: Hlc,
    config: LogConfig,
    can_append: Option<CanAppend<T>>,
    on_change: Option<OnChange<T>>,
    on_gid_removed: Option<OnGidRemoved>,
    can_trim: Option<CanTrim>,
    closed: AtomicBool,
    joining: Mutex<HashMap<String, PendingJoin<T>>>,
}

/// String form of a log id: hex blake3 of the raw id.
#[must_use]
pub fn derive_id_string(id: &[u8; 32]) -> String {
    blake3::hash(id).to_hex().to_string()
}

impl<T: Value> Log<T> {
    /// Open a log over `storage`, signing new entries as `identity`.
    ///
    /// A persisted log reopened with the same id gets its length, heads, and
    /// clock back from the index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the stores cannot be opened.
    pub fn open(
        storage: Storage,
        identity: Arc<dyn Identity>,
        options: LogOptions<T>,
    ) -> Result<Self> {
        let id = options.id.unwrap_or_else(|| rand::thread_rng().r#gen());
        let id_string = derive_id_string(&id);
        let (blocks, conn) = storage.open(&id_string)?;
        let index = EntryIndex::open(
            conn,
            id_string.clone(),
            blocks,
            options.sorting,
            options.config.index_options(),
        )?;

        let hlc = options
            .physical_clock
            .map_or_else(Hlc::new, Hlc::with_physical)
            .with_skew_threshold(options.config.skew_threshold_ms);
        if let Some(newest) = index.newest()? {
            // Never sign an entry older than what is already persisted.
            if let Some(skew) = hlc.update(newest.meta.clock.timestamp) {
                warn!(log = %id_string, %skew, "persisted entries are ahead of local time");
            }
        }

        debug!(
            log = %id_string,
            length = index.len(),
            tie_break = index.sorting().tie_break_name(),
            "opened log"
        );

        Ok(Self {
            inner: Arc::new(LogInner {
                id,
                id_string,
                identity,
                index,
                hlc,
                config: options.config,
                can_append: options.can_append,
                on_change: options.on_change,
                on_gid_removed: options.on_gid_removed,
                can_trim: options.can_trim,
                closed: AtomicBool::new(false),
                joining: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Append `data` as a new head.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] once the log is closed.
    /// - [`Error::AppendRejected`] when `can_append` refuses the entry;
    ///   nothing is stored in that case.
    /// - [`Error::MissingEntry`] when an explicit parent that is not in the
    ///   log cannot be joined first.
    pub async fn append(&self, data: T, options: AppendOptions<T>) -> Result<Appended<T>> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let is_cut = options.entry_type == EntryType::Cut;

        let next: Vec<NextRef> = if let Some(explicit) = options.next {
            if !is_cut {
                let mut missing = Vec::new();
                for parent in &explicit {
                    if !inner.index.has(parent.hash())? {
                        missing.push(parent.clone());
                    }
                }
                if !missing.is_empty() {
                    self.join(missing, JoinOptions::default()).await?;
                }
            }
            explicit.iter().map(NextRef::from).collect()
        } else {
            inner
                .index
                .heads(None)
                .collect_all()?
                .iter()
                .map(NextRef::from)
                .collect()
        };

        let timestamp = match options.timestamp {
            Some(timestamp) => {
                inner.observe(timestamp);
                timestamp
            }
            None => inner.hlc.now(),
        };

        let mut signers: Vec<Arc<dyn Identity>> = Vec::with_capacity(1 + options.signers.len());
        signers.push(Arc::clone(&inner.identity));
        signers.extend(options.signers);

        let entry = Entry::build(NewEntry {
            data,
            signers: &signers,
            timestamp,
            next,
            gid_seed: options.gid_seed,
            entry_type: options.entry_type,
            meta_data: options.meta_data,
        })?;

        if let Some(can_append) = &inner.can_append {
            if !can_append(&entry) {
                return Err(Error::AppendRejected {
                    hash: entry.hash().to_owned(),
                });
            }
        }

        entry.persist(inner.index.blocks().as_ref()).await?;
        let outcome = inner.index.put(
            &entry,
            PutOptions {
                unique: false,
                to_multihash: true,
            },
        )?;

        let removed = inner.settle(&entry, outcome.removed_gids).await?;
        debug!(
            log = %inner.id_string,
            hash = short(entry.hash()),
            gid = %entry.gid(),
            cut = is_cut,
            removed = removed.len(),
            "appended entry"
        );
        Ok(Appended { entry, removed })
    }

    /// Delete `hashes` from the log.
    ///
    /// With `recursively`, parents of deleted entries that no surviving
    /// non-CUT entry refers to are deleted too. Returns what was removed.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`], or storage errors. Entries removed before an error
    /// stay removed.
    pub async fn remove(&self, hashes: &[String], recursively: bool) -> Result<Vec<ShallowEntry>> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let removed = if recursively {
            inner.prune(hashes.to_vec(), Prune::Remove).await?
        } else {
            let mut removed = Vec::new();
            for hash in hashes {
                if let Some(gone) = inner.index.delete(hash).await? {
                    removed.push(gone);
                }
            }
            removed
        };

        debug!(log = %inner.id_string, removed = removed.len(), recursively, "removed entries");
        inner.notify(
            Change {
                added: Vec::new(),
                removed: removed.clone(),
            },
            Vec::new(),
        )?;
        Ok(removed)
    }

    /// Trim with `policy`, or with the configured policy when `None`.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`], or storage and ordering errors.
    pub async fn trim(&self, policy: Option<TrimPolicy>) -> Result<Vec<ShallowEntry>> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let removed = inner.trim_with(policy).await?;
        inner.notify(
            Change {
                added: Vec::new(),
                removed: removed.clone(),
            },
            Vec::new(),
        )?;
        Ok(removed)
    }

    /// Every entry, fully resolved, in log order.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`], or [`Error::MissingEntry`] if an indexed entry's
    /// bytes are gone.
    pub async fn to_array(&self) -> Result<Vec<Entry<T>>> {
        self.inner.ensure_open()?;
        let values = self.values()?;
        let mut entries = Vec::with_capacity(values.len());
        for shallow in values {
            let resolved = self
                .inner
                .index
                .get(&shallow.hash, ResolveOptions::default())
                .await?;
            if let Some(entry) = resolved {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Current heads, fully resolved, in log order.
    ///
    /// # Errors
    ///
    /// As for [`Log::to_array`].
    pub async fn resolved_heads(&self, gid: Option<&str>) -> Result<Vec<Entry<T>>> {
        self.inner.ensure_open()?;
        let heads = self.heads(gid).collect_all()?;
        let mut entries = Vec::with_capacity(heads.len());
        for head in heads {
            let resolved = self
                .inner
                .index
                .get(&head.hash, ResolveOptions::default())
                .await?;
            if let Some(entry) = resolved {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Resolve one indexed entry.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`], or errors from [`EntryIndex::get`].
    pub async fn get(&self, hash: &str) -> Result<Option<Entry<T>>> {
        self.inner.ensure_open()?;
        self.inner.index.get(hash, ResolveOptions::default()).await
    }
}

impl<T> Log<T> {
    #[must_use]
    pub fn id(&self) -> &[u8; 32] {
        &self.inner.id
    }

    /// Derived string id; also the index namespace.
    #[must_use]
    pub fn id_string(&self) -> &str {
        &self.inner.id_string
    }

    /// Number of entries in the log.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.index.is_empty()
    }

    /// Summed payload size of every entry.
    #[must_use]
    pub fn byte_length(&self) -> u64 {
        self.inner.index.byte_length()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn hlc(&self) -> &Hlc {
        &self.inner.hlc
    }

    #[must_use]
    pub fn blocks(&self) -> &Arc<dyn Blocks> {
        self.inner.index.blocks()
    }

    #[must_use]
    pub fn sorting(&self) -> &Sorting {
        self.inner.index.sorting()
    }

    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn index(&self) -> &EntryIndex<T> {
        &self.inner.index
    }

    /// Lazy, restartable iteration over the heads, optionally of one gid.
    #[must_use]
    pub fn heads(&self, gid: Option<&str>) -> SortedIter<'_, T> {
        self.inner.index.heads(gid)
    }

    #[must_use]
    pub fn iter(&self, direction: Direction) -> SortedIter<'_, T> {
        self.inner.index.iter(direction)
    }

    /// Every shallow entry in log order.
    ///
    /// # Errors
    ///
    /// Storage or ordering errors.
    pub fn values(&self) -> Result<Vec<ShallowEntry>> {
        self.inner.index.iter(Direction::Ascending).collect_all()
    }

    /// # Errors
    ///
    /// Storage errors.
    pub fn has(&self, hash: &str) -> Result<bool> {
        self.inner.index.has(hash)
    }

    /// # Errors
    ///
    /// Storage errors.
    pub fn get_shallow(&self, hash: &str) -> Result<Option<ShallowEntry>> {
        self.inner.index.get_shallow(hash)
    }

    /// # Errors
    ///
    /// Storage or ordering errors.
    pub fn oldest(&self) -> Result<Option<ShallowEntry>> {
        self.inner.index.oldest()
    }

    /// # Errors
    ///
    /// Storage or ordering errors.
    pub fn newest(&self) -> Result<Option<ShallowEntry>> {
        self.inner.index.newest()
    }

    /// # Errors
    ///
    /// Storage or ordering errors.
    pub fn before(&self, hash: &str) -> Result<Option<ShallowEntry>> {
        self.inner.index.before(hash)
    }

    /// # Errors
    ///
    /// Storage or ordering errors.
    pub fn after(&self, hash: &str) -> Result<Option<ShallowEntry>> {
        self.inner.index.after(hash)
    }

    /// Refuse further mutations and drop cached entries. Persisted data is
    /// untouched; open the log again to keep using it.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.index.clear_cache();
            debug!(log = %self.inner.id_string, "closed log");
        }
    }
}

impl<T: Value> LogInner<T> {
    async fn trim_with(&self, policy: Option<TrimPolicy>) -> Result<Vec<ShallowEntry>> {
        let Some(policy) = policy.or(self.config.trim) else {
            return Ok(Vec::new());
        };
        trim::trim(
            &self.index,
            policy,
            self.can_trim.as_ref(),
            self.hlc.physical_now(),
        )
        .await
    }

    /// Finish an insert: propagate a CUT, trim, and notify observers.
    /// Returns everything the insert caused to be removed.
    async fn settle(&self, entry: &Entry<T>, absorbed: Vec<String>) -> Result<Vec<ShallowEntry>> {
        let mut removed = Vec::new();
        if entry.is_cut() {
            removed.extend(self.prune(entry.next().to_vec(), Prune::Cut).await?);
        }
        removed.extend(self.trim_with(None).await?);
        self.notify(
            Change {
                added: vec![entry.clone()],
                removed: removed.clone(),
            },
            absorbed,
        )?;
        Ok(removed)
    }
}

impl<T> LogInner<T> {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Fold a timestamp from another replica into the HLC.
    fn observe(&self, timestamp: Timestamp) {
        if let Some(skew) = self.hlc.update(timestamp) {
            warn!(log = %self.id_string, %skew, "observed timestamp ahead of local time");
        }
    }

    /// Deliver `change` and the gids it emptied to the registered observers.
    ///
    /// `absorbed` are gids an insert left without heads; gids of removed
    /// entries are reported once no live entry of theirs remains.
    fn notify(&self, change: Change<T>, absorbed: Vec<String>) -> Result<()> {
        let mut gids: BTreeSet<String> = absorbed.into_iter().collect();
        for entry in &change.removed {
            let gid = &entry.meta.gid;
            if !gids.contains(gid) && !self.index.gid_has_live_entries(gid)? {
                gids.insert(entry.meta.gid.clone());
            }
        }

        if !gids.is_empty() {
            let gids: Vec<String> = gids.into_iter().collect();
            debug!(log = %self.id_string, ?gids, "gids removed");
            if let Some(on_gid_removed) = &self.on_gid_removed {
                on_gid_removed(&gids);
            }
        }
        if !change.is_empty() {
            if let Some(on_change) = &self.on_change {
                on_change(&change);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::entry::generate_identity;
    use std::sync::atomic::AtomicUsize;

    fn open(options: LogOptions<String>) -> Log<String> {
        Log::open(Storage::Memory, Arc::new(generate_identity()), options).expect("open log")
    }

    #[tokio::test]
    async fn append_chains_onto_heads() {
        let log = open(LogOptions::default());
        let a = log.append("a".into(), AppendOptions::default()).await.expect("append a");
        let b = log.append("b".into(), AppendOptions::default()).await.expect("append b");

        assert_eq!(b.entry.next(), [a.entry.hash().to_owned()]);
        assert_eq!(b.entry.gid(), a.entry.gid());
        assert_eq!(log.len(), 2);
        let heads: Vec<String> = log
            .heads(None)
            .collect_all()
            .expect("heads")
            .into_iter()
            .map(|e| e.hash)
            .collect();
        assert_eq!(heads, vec![b.entry.hash().to_owned()]);

        let values: Vec<String> = log
            .to_array()
            .await
            .expect("array")
            .iter()
            .map(|e| e.value().clone())
            .collect();
        assert_eq!(values, ["a", "b"]);
        assert!(b.entry.clock() > a.entry.clock());
    }

    #[tokio::test]
    async fn supplied_timestamp_is_used_and_observed() {
        let log = open(LogOptions::default());
        let ts = Timestamp::new(42, 7);
        let appended = log
            .append("x".into(), AppendOptions::default().with_timestamp(ts))
            .await
            .expect("append");
        assert_eq!(appended.entry.clock().timestamp, ts);
        assert!(log.hlc().last() > ts);
    }

    #[tokio::test]
    async fn rejected_append_stores_nothing() {
        let options =
            LogOptions::default().with_can_append(|e: &Entry<String>| e.value() != "nope");
        let log = open(options);
        let err = log
            .append("nope".into(), AppendOptions::default())
            .await
            .expect_err("rejected");
        assert!(matches!(err, Error::AppendRejected { .. }));
        assert!(log.is_empty());
        assert!(log.blocks().iter().await.expect("iter").is_empty());
    }

    #[tokio::test]
    async fn change_observer_sees_every_mutation() {
        let changes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&changes);
        let log = open(LogOptions::default().with_on_change(move |change: &Change<String>| {
            assert!(!change.is_empty());
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let a = log.append("a".into(), AppendOptions::default()).await.expect("append");
        log.remove(&[a.entry.hash().to_owned()], false).await.expect("remove");
        assert_eq!(changes.load(Ordering::SeqCst), 2);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn closed_log_refuses_mutations() {
        let log = open(LogOptions::default());
        log.append("a".into(), AppendOptions::default()).await.expect("append");
        log.close();
        assert!(log.is_closed());
        assert_eq!(
            log.append("b".into(), AppendOptions::default()).await.expect_err("closed"),
            Error::Closed
        );
        let join = log.join(Vec::new(), JoinOptions::default()).await;
        assert_eq!(join.expect_err("closed"), Error::Closed);
        assert_eq!(log.to_array().await.expect_err("closed"), Error::Closed);
    }

    #[tokio::test]
    async fn cut_append_removes_target_and_keeps_tombstone() {
        let removed_gids = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed_gids);
        let log = open(LogOptions::default().with_on_gid_removed(move |gids: &[String]| {
            sink.lock().expect("lock").extend_from_slice(gids);
        }));

        let a = log.append("a".into(), AppendOptions::default()).await.expect("append");
        let cut = log
            .append(String::new(), AppendOptions::cut(vec![a.entry.clone()]))
            .await
            .expect("cut");

        assert_eq!(cut.removed.len(), 1);
        assert_eq!(cut.removed[0].hash, a.entry.hash());
        assert!(!log.has(a.entry.hash()).expect("has"));
        assert!(log.has(cut.entry.hash()).expect("has"));
        assert_eq!(*removed_gids.lock().expect("lock"), vec![a.entry.gid().to_owned()]);
    }

    #[tokio::test]
    async fn configured_trim_runs_after_append() {
        let config = LogConfig {
            trim: Some(TrimPolicy::length(3)),
            ..LogConfig::default()
        };
        let log = open(LogOptions::default().with_config(config));
        for i in 0..10 {
            log.append(format!("{i}"), AppendOptions::default()).await.expect("append");
        }
        assert_eq!(log.len(), 3);
        let values: Vec<String> = log
            .to_array()
            .await
            .expect("array")
            .iter()
            .map(|e| e.value().clone())
            .collect();
        assert_eq!(values, ["7", "8", "9"]);
    }

    #[tokio::test]
    async fn co_signers_are_recorded() {
        let log = open(LogOptions::default());
        let extra: Arc<dyn Identity> = Arc::new(generate_identity());
        let options = AppendOptions {
            signers: vec![Arc::clone(&extra)],
            ..AppendOptions::default()
        };
        let appended = log.append("x".into(), options).await.expect("append");
        assert_eq!(appended.entry.signatures().len(), 2);
        appended.entry.verify_signatures().expect("valid");
        assert!(appended.entry.public_keys().contains(&extra.public_key().as_slice()));
    }

    #[test]
    fn id_string_is_stable() {
        let id = [7u8; 32];
        let log = open(LogOptions::default().with_id(id));
        assert_eq!(log.id(), &id);
        assert_eq!(log.id_string(), derive_id_string(&id));
        assert_eq!(log.id_string().len(), 64);
    }
}
