//! Tombstone propagation and recursive removal.

use std::collections::HashSet;

use tracing::trace;

use super::LogInner;
use crate::entry::ShallowEntry;
use crate::error::Result;
use crate::hash::short;

/// How a [`LogInner::prune`] walk treats its starting hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Prune {
    /// A CUT took effect: starting hashes go only when nothing live refers
    /// to them, and every hash found dead keeps a tombstone mark.
    Cut,
    /// Explicit removal: starting hashes go unconditionally, unmarked.
    Remove,
}

impl<T: Send + Sync> LogInner<T> {
    /// Delete `start` and walk backwards through parents.
    ///
    /// An entry is deleted when every indexed entry still referring to it is
    /// a CUT; parents of a deleted non-CUT entry are examined next. A hash
    /// kept because of a live referrer is examined again if that referrer is
    /// deleted later in the walk. The walk uses an explicit stack, so chain
    /// length is not bounded by the call stack.
    pub(super) async fn prune(&self, start: Vec<String>, mode: Prune) -> Result<Vec<ShallowEntry>> {
        let forced: HashSet<String> = match mode {
            Prune::Remove => start.iter().cloned().collect(),
            Prune::Cut => HashSet::new(),
        };
        let mut stack = start;
        stack.reverse();
        let mut settled = HashSet::new();
        let mut removed = Vec::new();

        while let Some(hash) = stack.pop() {
            if settled.contains(&hash) {
                continue;
            }
            if !forced.contains(&hash) && self.index.has_live_referrer(&hash)? {
                trace!(hash = short(&hash), "kept: live referrer remains");
                continue;
            }
            settled.insert(hash.clone());
            if mode == Prune::Cut {
                self.index.mark_tombstone(&hash)?;
            }
            let Some(gone) = self.index.delete(&hash).await? else {
                continue;
            };
            // A deleted CUT releases its targets; it does not delete them.
            if !gone.meta.is_cut() {
                stack.extend(gone.meta.next.iter().rev().cloned());
            }
            removed.push(gone);
        }
        Ok(removed)
    }
}
