//! SQLite schema shared by the block store and the shallow entry index.
//!
//! - `blocks` holds raw content-addressed bytes
//! - `entries` is the shallow projection of every indexed entry, namespaced
//!   by log id so several logs can share one database file
//! - `entry_next` models the DAG edges; the `next_hash` index answers
//!   "who points at this hash" for head tracking and tombstone walks
//! - `logs` records every log namespace opened against the file
//! - `block_owners` scopes blocks to the logs that stored them; bytes are
//!   dropped once their last owner releases them
//! - `tombstones` remembers hashes a log has seen cut, so a late delivery
//!   of one stays out

/// Migration v1: blocks, shallow entries, DAG edges, store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS blocks (
    hash TEXT PRIMARY KEY,
    bytes BLOB NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS entries (
    log TEXT NOT NULL,
    hash TEXT NOT NULL,
    gid TEXT NOT NULL,
    clock_id BLOB NOT NULL,
    wall_time INTEGER NOT NULL,
    logical INTEGER NOT NULL,
    entry_type INTEGER NOT NULL CHECK (entry_type IN (0, 1)),
    head INTEGER NOT NULL CHECK (head IN (0, 1)),
    payload_size INTEGER NOT NULL,
    meta_data BLOB,
    PRIMARY KEY (log, hash)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS entry_next (
    log TEXT NOT NULL,
    hash TEXT NOT NULL,
    position INTEGER NOT NULL,
    next_hash TEXT NOT NULL,
    PRIMARY KEY (log, hash, position)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);

CREATE INDEX IF NOT EXISTS idx_entries_order
    ON entries(log, wall_time, logical, clock_id);

CREATE INDEX IF NOT EXISTS idx_entries_head_gid
    ON entries(log, head, gid);

CREATE INDEX IF NOT EXISTS idx_entry_next_target
    ON entry_next(log, next_hash);
";

/// Migration v2: registry of log namespaces.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS logs (
    log TEXT PRIMARY KEY,
    cache_capacity INTEGER NOT NULL,
    opened_at_ns INTEGER NOT NULL
) WITHOUT ROWID;
";

/// Migration v3: per-log block ownership and tombstone marks.
///
/// Blocks written before v3 are claimed by every log that indexes them.
pub const MIGRATION_V3_SQL: &str = r"
CREATE TABLE IF NOT EXISTS block_owners (
    owner TEXT NOT NULL,
    hash TEXT NOT NULL,
    PRIMARY KEY (owner, hash)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_block_owners_hash
    ON block_owners(hash);

INSERT OR IGNORE INTO block_owners (owner, hash)
    SELECT log, hash FROM entries;

CREATE TABLE IF NOT EXISTS tombstones (
    log TEXT NOT NULL,
    hash TEXT NOT NULL,
    PRIMARY KEY (log, hash)
) WITHOUT ROWID;
";

/// Indexes every migrated database must carry.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_entries_order",
    "idx_entries_head_gid",
    "idx_entry_next_target",
    "idx_block_owners_hash",
];
