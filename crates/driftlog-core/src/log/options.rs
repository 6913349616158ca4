//! Runtime hooks and per-call options for a [`super::Log`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;

use crate::blocks::{Blocks, MemoryBlocks, SqliteBlocks};
use crate::clock::Timestamp;
use crate::clock::hlc::PhysicalClock;
use crate::config::LogConfig;
use crate::db;
use crate::entry::{Entry, EntryType, Identity, ShallowEntry};
use crate::error::Result;
use crate::sort::Sorting;
use crate::trim::CanTrim;

/// Entries added to and removed from a log by one mutation.
#[derive(Debug, Clone)]
pub struct Change<T> {
    pub added: Vec<Entry<T>>,
    pub removed: Vec<ShallowEntry>,
}

impl<T> Change<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl<T> Default for Change<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Admission predicate for appended and joined entries.
pub type CanAppend<T> = Arc<dyn Fn(&Entry<T>) -> bool + Send + Sync>;

/// Observer of every mutation's [`Change`].
pub type OnChange<T> = Arc<dyn Fn(&Change<T>) + Send + Sync>;

/// Observer of gids that lost their last head or their last live entry.
pub type OnGidRemoved = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Everything needed to open a log besides its storage and identity.
pub struct LogOptions<T> {
    /// Fixed log id; a random one is generated when absent. Reopening a
    /// persisted log requires the same id.
    pub id: Option<[u8; 32]>,
    pub config: LogConfig,
    pub sorting: Sorting,
    pub can_append: Option<CanAppend<T>>,
    pub on_change: Option<OnChange<T>>,
    pub on_gid_removed: Option<OnGidRemoved>,
    pub can_trim: Option<CanTrim>,
    /// Physical time source for the log's HLC (system clock by default).
    pub physical_clock: Option<PhysicalClock>,
}

impl<T> Default for LogOptions<T> {
    fn default() -> Self {
        Self {
            id: None,
            config: LogConfig::default(),
            sorting: Sorting::default(),
            can_append: None,
            on_change: None,
            on_gid_removed: None,
            can_trim: None,
            physical_clock: None,
        }
    }
}

impl<T> fmt::Debug for LogOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOptions")
            .field("id", &self.id.map(hex::encode))
            .field("config", &self.config)
            .field("sorting", &self.sorting)
            .field("can_append", &self.can_append.is_some())
            .field("on_change", &self.on_change.is_some())
            .field("on_gid_removed", &self.on_gid_removed.is_some())
            .field("can_trim", &self.can_trim.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> LogOptions<T> {
    #[must_use]
    pub const fn with_id(mut self, id: [u8; 32]) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_sorting(mut self, sorting: Sorting) -> Self {
        self.sorting = sorting;
        self
    }

    #[must_use]
    pub fn with_can_append(
        mut self,
        f: impl Fn(&Entry<T>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.can_append = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_on_change(mut self, f: impl Fn(&Change<T>) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_on_gid_removed(mut self, f: impl Fn(&[String]) + Send + Sync + 'static) -> Self {
        self.on_gid_removed = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_can_trim(
        mut self,
        f: impl Fn(&ShallowEntry) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.can_trim = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn with_physical_clock(mut self, clock: PhysicalClock) -> Self {
        self.physical_clock = Some(clock);
        self
    }
}

/// Where a log keeps its blocks and its index.
pub enum Storage {
    /// In-process blocks and an in-memory SQLite index.
    Memory,
    /// One SQLite file holding both the blocks and the index tables. Several
    /// logs may share a file; each sees only the blocks it stored.
    Sqlite(PathBuf),
    /// A caller-supplied block store with an already-migrated index
    /// connection.
    Custom {
        blocks: Arc<dyn Blocks>,
        index: Connection,
    },
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::Sqlite(path) => f.debug_tuple("Sqlite").field(path).finish(),
            Self::Custom { .. } => f.write_str("Custom"),
        }
    }
}

impl Storage {
    #[must_use]
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::Sqlite(path.into())
    }

    /// `blocks` with an in-memory index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the index database cannot be
    /// created.
    pub fn with_blocks(blocks: Arc<dyn Blocks>) -> Result<Self> {
        Ok(Self::Custom {
            blocks,
            index: db::open_in_memory()?,
        })
    }

    pub(super) fn open(self, log: &str) -> Result<(Arc<dyn Blocks>, Connection)> {
        match self {
            Self::Memory => Ok((Arc::new(MemoryBlocks::new()), db::open_in_memory()?)),
            Self::Sqlite(path) => {
                let blocks = SqliteBlocks::open(&path)?.for_owner(log);
                Ok((Arc::new(blocks), db::open(&path)?))
            }
            Self::Custom { blocks, index } => Ok((blocks, index)),
        }
    }
}

/// Options for [`super::Log::append`].
pub struct AppendOptions<T> {
    /// Parents of the new entry; the current heads when `None`. Parents not
    /// yet in the log are joined first, unless the new entry is a CUT.
    pub next: Option<Vec<Entry<T>>>,
    /// Use this timestamp instead of the HLC's next one.
    pub timestamp: Option<Timestamp>,
    /// Co-signers in addition to the log's identity.
    pub signers: Vec<Arc<dyn Identity>>,
    pub entry_type: EntryType,
    pub gid_seed: Option<Vec<u8>>,
    pub meta_data: Option<Vec<u8>>,
}

impl<T> Default for AppendOptions<T> {
    fn default() -> Self {
        Self {
            next: None,
            timestamp: None,
            signers: Vec::new(),
            entry_type: EntryType::Append,
            gid_seed: None,
            meta_data: None,
        }
    }
}

impl<T> AppendOptions<T> {
    /// A CUT whose parents are `targets`.
    #[must_use]
    pub fn cut(targets: Vec<Entry<T>>) -> Self {
        Self {
            next: Some(targets),
            entry_type: EntryType::Cut,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_next(mut self, next: Vec<Entry<T>>) -> Self {
        self.next = Some(next);
        self
    }

    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Options for joins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinOptions {
    /// Overrides [`LogConfig::verify_signatures`].
    pub verify_signatures: Option<bool>,
    /// Overrides [`LogConfig::fetch_timeout_ms`] for block fetches.
    pub timeout: Option<Duration>,
    /// Let the log's own block store fetch from remote peers.
    pub remote: bool,
}

impl JoinOptions {
    #[must_use]
    pub const fn verified(mut self) -> Self {
        self.verify_signatures = Some(true);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for [`super::Log::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Heads to load from; the currently indexed heads when `None`.
    pub heads: Option<Vec<String>>,
    /// Drop the index and rebuild it from `heads` alone.
    pub reset: bool,
    /// Per-fetch timeout; fetches that expire count as missing.
    pub timeout: Option<Duration>,
}

/// What a load or recover managed to bring in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Heads that were joined (or already present).
    pub loaded: Vec<String>,
    /// Heads whose entries, or whose ancestors, could not be resolved.
    pub missing: Vec<String>,
    /// Blocks that could not be decoded as entries (recover only).
    pub skipped_blocks: usize,
}

impl LoadReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Result of a successful append.
#[derive(Debug, Clone)]
pub struct Appended<T> {
    pub entry: Entry<T>,
    /// Entries removed by CUT propagation or trimming.
    pub removed: Vec<ShallowEntry>,
}

/// Why a join left an entry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The log reached `max_length`.
    MaxLength,
    /// `can_append` refused the entry.
    Rejected,
    /// An indexed CUT that sorts after the entry already deleted it.
    Shadowed,
}

/// Result of joining one entry.
#[derive(Debug, Clone)]
pub enum JoinOutcome<T> {
    Inserted {
        entry: Entry<T>,
        removed: Vec<ShallowEntry>,
    },
    /// Already indexed; nothing changed.
    Present,
    Skipped(SkipReason),
}

impl<T> JoinOutcome<T> {
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted { .. })
    }
}
