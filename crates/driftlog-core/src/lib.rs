//! driftlog-core: a replicated, conflict-free append log.
//!
//! Entries are signed, content-addressed DAG nodes. Replicas exchange them in
//! any order, any number of times, and converge on the same entry set, the
//! same heads, and the same linear order.
//!
//! # Conventions
//!
//! - **Errors**: library code returns [`error::Result`]; config loading uses
//!   `anyhow::Result` with context.
//! - **Logging**: `tracing` macros with structured fields (`hash`, `gid`,
//!   `log`). Routine work at `debug!`/`trace!`, absorbed anomalies at
//!   `warn!`.
//! - **Hashes**: `blake3:<hex>` over the canonical postcard bytes.

pub mod blocks;
pub mod clock;
pub mod config;
pub mod db;
pub mod entry;
pub mod error;
pub mod hash;
pub mod index;
pub mod log;
pub mod sort;
pub mod trim;

pub use blocks::{Blocks, GetOptions, LayeredBlocks, MemoryBlocks, SqliteBlocks};
pub use clock::{Clock, Hlc, Timestamp};
pub use config::{LogConfig, load_log_config};
pub use entry::{Entry, EntryType, Identity, NextRef, ShallowEntry, Value, generate_identity};
pub use error::{Error, ErrorCode, Result};
pub use log::{
    AppendOptions, Appended, Change, JoinOptions, JoinOutcome, LoadOptions, LoadReport, Log,
    LogOptions, SkipReason, Storage,
};
pub use sort::{LastWriteWins, SortByEntryHash, Sorting, TieBreak};
pub use trim::TrimPolicy;
