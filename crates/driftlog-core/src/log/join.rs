//! Merging entries from other replicas.
//!
//! Each hash is joined by one unit of work. Units live in the log's
//! in-flight map while they run, so concurrent callers for the same hash
//! await a single shared future: one fetch, one verification, one insert,
//! one HLC update. A finished unit removes itself from the map; later calls
//! find the hash indexed and return [`JoinOutcome::Present`].
//!
//! Before a non-CUT entry is indexed its missing ancestors are collected by
//! an iterative depth-first walk and joined oldest-first, so a child is never
//! indexed before its parents. CUT entries skip the walk: the ancestors they
//! delete are never fetched.
//!
//! # Cut-off entries
//!
//! A hash is cut off when it carries a tombstone mark or an indexed CUT names
//! it. A supplied entry that is cut off and that no indexed non-CUT entry
//! refers to is skipped as [`SkipReason::Shadowed`], and its parents are
//! pruned as if it had been indexed and then cut. Two kinds of entries are
//! indexed anyway and settled once the whole call is done:
//!
//! - ancestors reached from an entry being joined, which that entry needs
//! - supplied entries that another supplied non-CUT entry lists as a parent
//!
//! At the end of the call each of them still cut off is pruned, together
//! with the parents of every skipped entry. Whether an entry survives
//! therefore depends only on which entries have been seen, not on the order
//! they arrived in.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, trace, warn};

use super::prune::Prune;
use super::{Change, JoinOptions, JoinOutcome, Log, LogInner, PendingJoin, SkipReason};
use crate::blocks::{self, Blocks, GetOptions};
use crate::entry::{Entry, Value};
use crate::error::{Error, Result};
use crate::hash::short;
use crate::index::{PutOptions, ResolveOptions};

/// Where a join finds entries it does not hold yet.
pub(super) struct JoinContext<T> {
    /// Entries supplied by the caller, by hash.
    pub refs: HashMap<String, Entry<T>>,
    /// Another replica's block store, consulted after the local one.
    pub remote: Option<Arc<dyn Blocks>>,
    pub verify_signatures: bool,
    pub timeout: Option<Duration>,
    /// Let the local block store go to the network.
    pub remote_fetch: bool,
    /// Parents of the supplied non-CUT entries.
    pub needed: HashSet<String>,
    /// Hashes to prune once the call is done.
    pub cut_off: Mutex<Vec<String>>,
}

impl<T> JoinContext<T> {
    fn defer_prune(&self, hashes: &[String]) {
        self.cut_off
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(hashes);
    }

    fn take_cut_off(&self) -> Vec<String> {
        std::mem::take(&mut *self.cut_off.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

enum Step<T> {
    Visit(String),
    Emit(Entry<T>),
}

impl<T: Value> Log<T> {
    /// Join `entries` and whatever ancestors of theirs are missing.
    ///
    /// Entries are joined oldest-first; the result holds one outcome per
    /// distinct entry in that order. Duplicate deliveries are no-ops.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSignature`] when verification is on and an entry or
    ///   ancestor carries a bad signature.
    /// - [`Error::MissingEntry`] when an ancestor cannot be found.
    /// - [`Error::HashMismatch`] for entries whose bytes do not match their
    ///   hash.
    ///
    /// Entries joined before the error stay joined.
    pub async fn join(
        &self,
        mut entries: Vec<Entry<T>>,
        options: JoinOptions,
    ) -> Result<Vec<JoinOutcome<T>>> {
        self.inner.ensure_open()?;
        self.inner.index.sorting().sort(&mut entries)?;

        let mut order = Vec::with_capacity(entries.len());
        let mut refs = HashMap::with_capacity(entries.len());
        for entry in entries {
            if !refs.contains_key(entry.hash()) {
                order.push(entry.hash().to_owned());
                refs.insert(entry.hash().to_owned(), entry);
            }
        }

        let ctx = self.inner.context(refs, None, options);
        self.inner.join_all(order, &ctx).await
    }

    /// Join entries known only by hash, fetching them through the block
    /// store.
    ///
    /// # Errors
    ///
    /// As for [`Log::join`]; an unresolvable hash is
    /// [`Error::MissingEntry`].
    pub async fn join_hashes(
        &self,
        hashes: &[String],
        options: JoinOptions,
    ) -> Result<Vec<JoinOutcome<T>>> {
        self.inner.ensure_open()?;
        let ctx = self.inner.context(HashMap::new(), None, options);
        self.inner.join_all(hashes.to_vec(), &ctx).await
    }

    /// Join everything reachable from `other`'s heads, reading missing
    /// ancestors from `other`'s block store.
    ///
    /// # Errors
    ///
    /// As for [`Log::join`], plus [`Error::Closed`] if either log is closed.
    pub async fn join_log(
        &self,
        other: &Self,
        options: JoinOptions,
    ) -> Result<Vec<JoinOutcome<T>>> {
        self.inner.ensure_open()?;
        let mut heads = other.resolved_heads(None).await?;
        self.inner.index.sorting().sort(&mut heads)?;

        let order = heads.iter().map(|e| e.hash().to_owned()).collect();
        let refs = heads.into_iter().map(|e| (e.hash().to_owned(), e)).collect();
        let ctx = self
            .inner
            .context(refs, Some(Arc::clone(other.blocks())), options);
        self.inner.join_all(order, &ctx).await
    }
}

impl<T: Value> LogInner<T> {
    pub(super) fn context(
        &self,
        refs: HashMap<String, Entry<T>>,
        remote: Option<Arc<dyn Blocks>>,
        options: JoinOptions,
    ) -> Arc<JoinContext<T>> {
        let needed = refs
            .values()
            .filter(|e| !e.is_cut())
            .flat_map(|e| e.next().iter().cloned())
            .collect();
        Arc::new(JoinContext {
            needed,
            cut_off: Mutex::new(Vec::new()),
            refs,
            remote,
            verify_signatures: options
                .verify_signatures
                .unwrap_or(self.config.verify_signatures),
            timeout: options.timeout.or_else(|| self.config.fetch_timeout()),
            remote_fetch: options.remote,
        })
    }

    async fn join_all(
        self: &Arc<Self>,
        order: Vec<String>,
        ctx: &Arc<JoinContext<T>>,
    ) -> Result<Vec<JoinOutcome<T>>> {
        let mut outcomes = Vec::with_capacity(order.len());
        let mut failure = None;
        for hash in order {
            let provided = ctx.refs.get(&hash).cloned();
            match self.join_one(hash, provided, Arc::clone(ctx), true).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.settle_cut_off(ctx).await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// Prune everything the call found cut off.
    pub(super) async fn settle_cut_off(&self, ctx: &JoinContext<T>) -> Result<()> {
        let pending = ctx.take_cut_off();
        if pending.is_empty() {
            return Ok(());
        }
        let removed = self.prune(pending, Prune::Cut).await?;
        if !removed.is_empty() {
            debug!(log = %self.id_string, removed = removed.len(), "pruned cut-off entries");
        }
        self.notify(
            Change {
                added: Vec::new(),
                removed,
            },
            Vec::new(),
        )
    }

    /// The in-flight unit for `hash`, started if there is none.
    pub(super) fn join_one(
        self: &Arc<Self>,
        hash: String,
        provided: Option<Entry<T>>,
        ctx: Arc<JoinContext<T>>,
        walk: bool,
    ) -> PendingJoin<T> {
        let mut joining = self.joining.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = joining.get(&hash) {
            trace!(hash = short(&hash), "awaiting in-flight join");
            return pending.clone();
        }

        let inner = Arc::clone(self);
        let key = hash.clone();
        let unit = async move {
            let outcome = inner.join_unit(&key, provided, &ctx, walk).await;
            inner
                .joining
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            outcome
        }
        .boxed()
        .shared();
        joining.insert(hash, unit.clone());
        unit
    }

    async fn join_unit(
        self: &Arc<Self>,
        hash: &str,
        provided: Option<Entry<T>>,
        ctx: &Arc<JoinContext<T>>,
        walk: bool,
    ) -> Result<JoinOutcome<T>> {
        self.ensure_open()?;
        if self.index.has(hash)? {
            return Ok(JoinOutcome::Present);
        }
        if let Some(max) = self.config.max_length {
            if self.index.len() >= max {
                debug!(log = %self.id_string, hash = short(hash), max, "log full; join skipped");
                return Ok(JoinOutcome::Skipped(SkipReason::MaxLength));
            }
        }

        let entry = match provided {
            Some(entry) => entry,
            None => self.resolve_for_join(hash, ctx).await?,
        };
        if entry.hash() != hash {
            return Err(Error::HashMismatch {
                stored: hash.to_owned(),
                computed: entry.hash().to_owned(),
            });
        }
        if ctx.verify_signatures {
            entry.verify_signatures()?;
        }
        if let Some(can_append) = &self.can_append {
            if !can_append(&entry) {
                warn!(
                    log = %self.id_string,
                    hash = short(hash),
                    "join skipped entry refused by can_append"
                );
                return Ok(JoinOutcome::Skipped(SkipReason::Rejected));
            }
        }

        let cut_off = walk && self.index.is_cut_off(hash)?;
        if cut_off && !ctx.needed.contains(hash) && !self.index.has_live_referrer(hash)? {
            self.index.mark_tombstone(hash)?;
            ctx.defer_prune(entry.next());
            warn!(log = %self.id_string, hash = short(hash), "join skipped entry already cut");
            return Ok(JoinOutcome::Skipped(SkipReason::Shadowed));
        }

        if walk && !entry.is_cut() {
            self.join_ancestors(&entry, ctx).await?;
        }

        self.observe(entry.clock().timestamp);
        self.index.blocks().put(entry.to_bytes()?).await?;
        let outcome = self.index.put(
            &entry,
            PutOptions {
                unique: false,
                to_multihash: true,
            },
        )?;
        if !outcome.inserted {
            return Ok(JoinOutcome::Present);
        }
        // Also catches a CUT for this entry that landed while it was joined.
        if walk && (cut_off || self.index.is_cut_off(hash)?) {
            trace!(hash = short(hash), "indexed cut-off entry; settled after the join");
            ctx.defer_prune(&[hash.to_owned()]);
        }

        let removed = self.settle(&entry, outcome.removed_gids).await?;
        trace!(
            log = %self.id_string,
            hash = short(hash),
            gid = %entry.gid(),
            head = outcome.head,
            removed = removed.len(),
            "joined entry"
        );
        Ok(JoinOutcome::Inserted { entry, removed })
    }

    /// Join every missing ancestor of `entry`, oldest first.
    async fn join_ancestors(
        self: &Arc<Self>,
        entry: &Entry<T>,
        ctx: &Arc<JoinContext<T>>,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<Step<T>> = entry
            .next()
            .iter()
            .rev()
            .map(|hash| Step::Visit(hash.clone()))
            .collect();

        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(hash) => {
                    if !seen.insert(hash.clone()) || self.index.has(&hash)? {
                        continue;
                    }
                    let parent = self.resolve_for_join(&hash, ctx).await?;
                    let grandparents = if parent.is_cut() {
                        Vec::new()
                    } else {
                        parent.next().to_vec()
                    };
                    stack.push(Step::Emit(parent));
                    stack.extend(grandparents.into_iter().rev().map(Step::Visit));
                }
                Step::Emit(parent) => order.push(parent),
            }
        }

        if !order.is_empty() {
            debug!(
                log = %self.id_string,
                hash = short(entry.hash()),
                ancestors = order.len(),
                "joining missing ancestors"
            );
        }
        for parent in order {
            let hash = parent.hash().to_owned();
            self.join_one(hash, Some(parent), Arc::clone(ctx), false).await?;
        }
        Ok(())
    }

    /// Find an entry: caller-supplied refs, then local blocks, then the
    /// remote store.
    async fn resolve_for_join(&self, hash: &str, ctx: &JoinContext<T>) -> Result<Entry<T>> {
        if let Some(entry) = ctx.refs.get(hash) {
            return Ok(entry.clone());
        }

        let local = ResolveOptions {
            ignore_missing: true,
            remote: ctx.remote_fetch,
            timeout: ctx.timeout,
        };
        if let Some(entry) = self.index.resolve(hash, local).await? {
            return Ok(entry);
        }

        if let Some(remote) = &ctx.remote {
            let options = GetOptions::local()
                .with_timeout(ctx.timeout)
                .with_remote(ctx.remote_fetch);
            if let Some(bytes) = blocks::fetch(remote.as_ref(), hash, options).await? {
                return Entry::from_bytes(hash, &bytes);
            }
        }

        Err(Error::MissingEntry {
            hash: hash.to_owned(),
        })
    }
}
