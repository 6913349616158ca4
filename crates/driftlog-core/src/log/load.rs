//! Loading a log from its heads and rebuilding it from the block store.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::join::JoinContext;
use super::{JoinOptions, LoadOptions, LoadReport, Log, LogInner};
use crate::entry::{Entry, Value};
use crate::error::{Error, Result};
use crate::hash::short;

impl<T: Value> Log<T> {
    /// Join `options.heads` (the indexed heads by default) and everything
    /// they reach, optionally rebuilding the index from scratch first.
    ///
    /// Heads whose entry or ancestors cannot be fetched before the timeout
    /// are reported as missing; whatever resolved stays loaded.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`], storage errors, and integrity failures. Missing
    /// data is not an error.
    pub async fn load(&self, options: LoadOptions) -> Result<LoadReport> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let heads = match options.heads {
            Some(heads) => heads,
            None => self
                .heads(None)
                .collect_all()?
                .into_iter()
                .map(|e| e.hash)
                .collect(),
        };
        if options.reset {
            inner.index.clear()?;
            debug!(log = %inner.id_string, heads = heads.len(), "reset index for load");
        }

        let join = JoinOptions {
            timeout: options.timeout,
            ..JoinOptions::default()
        };
        let ctx = inner.context(HashMap::new(), None, join);
        inner.load_heads(heads, &ctx).await
    }

    /// Rebuild the index from every decodable block in the block store.
    ///
    /// Candidate heads are the blocks no other decoded non-CUT entry points
    /// at, plus whatever the index still lists as heads. The index is then
    /// cleared and reloaded from those candidates.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`], or storage errors from either store.
    pub async fn recover(&self) -> Result<LoadReport> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let mut refs: HashMap<String, Entry<T>> = HashMap::new();
        let mut skipped_blocks = 0;
        for (hash, bytes) in inner.index.blocks().iter().await? {
            match Entry::from_bytes(&hash, &bytes) {
                Ok(entry) => {
                    refs.insert(hash, entry);
                }
                Err(e) => {
                    warn!(hash = short(&hash), error = %e, "recover skipping undecodable block");
                    skipped_blocks += 1;
                }
            }
        }

        let mut candidates: BTreeSet<String> = self
            .heads(None)
            .collect_all()?
            .into_iter()
            .map(|e| e.hash)
            .collect();
        {
            let referenced: HashSet<&str> = refs
                .values()
                .filter(|e| !e.is_cut())
                .flat_map(|e| e.next().iter().map(String::as_str))
                .collect();
            candidates.extend(
                refs.keys()
                    .filter(|hash| !referenced.contains(hash.as_str()))
                    .cloned(),
            );
        }

        info!(
            log = %inner.id_string,
            blocks = refs.len(),
            skipped_blocks,
            candidates = candidates.len(),
            "recovering log from block store"
        );
        inner.index.clear()?;

        let ctx = inner.context(refs, None, JoinOptions::default());
        let mut report = inner
            .load_heads(candidates.into_iter().collect(), &ctx)
            .await?;
        report.skipped_blocks = skipped_blocks;
        Ok(report)
    }
}

impl<T: Value> LogInner<T> {
    async fn load_heads(
        self: &Arc<Self>,
        heads: Vec<String>,
        ctx: &Arc<JoinContext<T>>,
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        for head in heads {
            let provided = ctx.refs.get(&head).cloned();
            match self.join_one(head.clone(), provided, Arc::clone(ctx), true).await {
                Ok(_) => report.loaded.push(head),
                Err(Error::MissingEntry { hash }) => {
                    warn!(
                        log = %self.id_string,
                        head = short(&head),
                        missing = short(&hash),
                        "load could not resolve head"
                    );
                    report.missing.push(head);
                }
                Err(e) => {
                    self.settle_cut_off(ctx).await?;
                    return Err(e);
                }
            }
        }
        self.settle_cut_off(ctx).await?;
        debug!(
            log = %self.id_string,
            loaded = report.loaded.len(),
            missing = report.missing.len(),
            length = self.index.len(),
            "loaded heads"
        );
        Ok(report)
    }
}
