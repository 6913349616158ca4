//! Bounded garbage collection of the oldest entries.
//!
//! A [`TrimPolicy`] says when a log is over budget; trimming then deletes
//! entries oldest-first in log order until it is back under. Non-head
//! entries go first: heads are only deleted if removing every permitted
//! non-head still leaves the log over budget. An optional [`CanTrim`]
//! predicate can protect entries (for example every entry of a gid this
//! replica is the only holder of).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::ShallowEntry;
use crate::error::Result;
use crate::index::{Direction, EntryIndex};

/// Predicate deciding whether an entry may be trimmed.
pub type CanTrim = Arc<dyn Fn(&ShallowEntry) -> bool + Send + Sync>;

/// When a log is over budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrimPolicy {
    /// Once the entry count exceeds `from` (default: `to`), trim down to `to`.
    Length {
        to: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<u64>,
    },
    /// Keep the summed payload size at or below `to` bytes.
    ByteLength { to: u64 },
    /// Drop entries whose wall time is older than `max_age_ms` before now.
    Time { max_age_ms: u64 },
}

impl TrimPolicy {
    #[must_use]
    pub const fn length(to: u64) -> Self {
        Self::Length { to, from: None }
    }
}

impl fmt::Display for TrimPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length { to, from: None } => write!(f, "length<={to}"),
            Self::Length {
                to,
                from: Some(from),
            } => write!(f, "length<={to} (after {from})"),
            Self::ByteLength { to } => write!(f, "bytes<={to}"),
            Self::Time { max_age_ms } => write!(f, "age<={max_age_ms}ms"),
        }
    }
}

/// Apply `policy` to `index`, returning the deleted projections oldest-first.
///
/// `now_ns` is the reference wall time for [`TrimPolicy::Time`].
///
/// # Errors
///
/// Returns storage or ordering errors from the index. Entries deleted before
/// the error stay deleted.
pub async fn trim<T: Send>(
    index: &EntryIndex<T>,
    policy: TrimPolicy,
    can_trim: Option<&CanTrim>,
    now_ns: u64,
) -> Result<Vec<ShallowEntry>> {
    let mut removed = Vec::new();
    match policy {
        TrimPolicy::Length { to, from } => {
            if index.len() > from.unwrap_or(to).max(to) {
                evict(index, can_trim, |i| i.len() > to, &mut removed).await?;
            }
        }
        TrimPolicy::ByteLength { to } => {
            evict(index, can_trim, |i| i.byte_length() > to, &mut removed).await?;
        }
        TrimPolicy::Time { max_age_ms } => {
            let cutoff = now_ns.saturating_sub(max_age_ms.saturating_mul(1_000_000));
            expire(index, can_trim, cutoff, &mut removed).await?;
        }
    }

    if !removed.is_empty() {
        debug!(%policy, removed = removed.len(), length = index.len(), "trimmed log");
    }
    Ok(removed)
}

fn permitted(can_trim: Option<&CanTrim>, entry: &ShallowEntry) -> bool {
    can_trim.is_none_or(|f| f(entry))
}

async fn evict<T: Send>(
    index: &EntryIndex<T>,
    can_trim: Option<&CanTrim>,
    over_budget: impl Fn(&EntryIndex<T>) -> bool + Send,
    removed: &mut Vec<ShallowEntry>,
) -> Result<()> {
    for include_heads in [false, true] {
        if !over_budget(index) {
            break;
        }
        let mut oldest_first = index.iter(Direction::Ascending);
        while over_budget(index) {
            let Some(entry) = oldest_first.next().transpose()? else {
                break;
            };
            if (entry.head && !include_heads) || !permitted(can_trim, &entry) {
                continue;
            }
            if let Some(gone) = index.delete(&entry.hash).await? {
                removed.push(gone);
            }
        }
    }
    Ok(())
}

async fn expire<T: Send>(
    index: &EntryIndex<T>,
    can_trim: Option<&CanTrim>,
    cutoff_ns: u64,
    removed: &mut Vec<ShallowEntry>,
) -> Result<()> {
    let mut oldest_first = index.iter(Direction::Ascending);
    while let Some(entry) = oldest_first.next().transpose()? {
        if entry.meta.clock.timestamp.wall_time >= cutoff_ns {
            break;
        }
        if !permitted(can_trim, &entry) {
            continue;
        }
        if let Some(gone) = index.delete(&entry.hash).await? {
            removed.push(gone);
        }
    }
    Ok(())
}
