//! The entry index: which entries a log currently holds.
//!
//! Two layers:
//!
//! 1. **Shallow projection** in SQLite: hash, clock, gid, type, parent
//!    edges, payload size, and the `head` flag, namespaced by log id.
//! 2. **Resolved cache**: a small LRU of fully decoded [`Entry`] values;
//!    misses fall back to the block store.
//!
//! # Head tracking
//!
//! `head` is true iff no indexed non-CUT entry lists the hash in its `next`.
//! Inserting a non-CUT entry clears its parents' flags; deleting one
//! re-promotes every parent left without a live referrer. CUT entries never
//! affect heads.
//!
//! # Counters
//!
//! `length` and `byte_length` are loaded from the table when the index is
//! opened and maintained under the connection lock afterwards.

mod iter;

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lru::LruCache;
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::blocks::{self, Blocks, GetOptions};
use crate::clock::skew::wall_clock_now_ns;
use crate::clock::{Clock, Timestamp};
use crate::db::{wall_from_sql, wall_to_sql};
use crate::entry::{Entry, EntryType, Meta, ShallowEntry};
use crate::error::{Error, Result};
use crate::hash::short;
use crate::sort::Sorting;

use iter::Cursor;
pub use iter::{Direction, Filter, SortedIter};

const SHALLOW_COLUMNS: &str =
    "hash, gid, clock_id, wall_time, logical, entry_type, head, payload_size, meta_data";

/// Tuning knobs for an [`EntryIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    /// Resolved-entry LRU capacity (minimum 1).
    pub cache_capacity: usize,
    /// Page size for sorted iteration (minimum 1).
    pub fetch_size: usize,
    /// Default timeout for block fetches.
    pub fetch_timeout: Option<Duration>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            cache_capacity: 10,
            fetch_size: 64,
            fetch_timeout: None,
        }
    }
}

/// Options for [`EntryIndex::put`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// The caller guarantees the hash is new; skip the existence check.
    pub unique: bool,
    /// Recompute the content hash and check it against the entry's own.
    pub to_multihash: bool,
}

/// What an insert changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// False when the hash was already indexed.
    pub inserted: bool,
    /// Whether the new entry is a head.
    pub head: bool,
    /// Parent gids left without any head by this insert.
    pub removed_gids: Vec<String>,
}

/// Options for resolving full entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Return `Ok(None)` instead of [`Error::MissingEntry`] when the block
    /// store does not have the bytes.
    pub ignore_missing: bool,
    /// Let the block store fetch from remote peers.
    pub remote: bool,
    /// Overrides the index's default fetch timeout.
    pub timeout: Option<Duration>,
}

/// Per-log entry index.
pub struct EntryIndex<T> {
    log: String,
    conn: Mutex<Connection>,
    blocks: Arc<dyn Blocks>,
    sorting: Sorting,
    cache: Mutex<LruCache<String, Entry<T>>>,
    length: AtomicU64,
    byte_length: AtomicU64,
    fetch_size: usize,
    fetch_timeout: Option<Duration>,
}

impl<T> std::fmt::Debug for EntryIndex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryIndex")
            .field("log", &self.log)
            .field("length", &self.len())
            .field("sorting", &self.sorting)
            .finish_non_exhaustive()
    }
}

impl<T> EntryIndex<T> {
    /// Open the index namespace `log` on an already-migrated connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the namespace cannot be registered or
    /// counted.
    pub fn open(
        conn: Connection,
        log: impl Into<String>,
        blocks: Arc<dyn Blocks>,
        sorting: Sorting,
        options: IndexOptions,
    ) -> Result<Self> {
        let log = log.into();
        let capacity = NonZeroUsize::new(options.cache_capacity).unwrap_or(NonZeroUsize::MIN);

        conn.execute(
            "INSERT INTO logs (log, cache_capacity, opened_at_ns) VALUES (?1, ?2, ?3)
             ON CONFLICT(log) DO UPDATE SET
                cache_capacity = excluded.cache_capacity,
                opened_at_ns = excluded.opened_at_ns",
            params![
                log,
                i64::try_from(capacity.get()).unwrap_or(i64::MAX),
                i64::try_from(wall_clock_now_ns()).unwrap_or(i64::MAX),
            ],
        )?;
        let (count, bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(payload_size), 0) FROM entries WHERE log = ?1",
            [&log],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        debug!(log = %log, length = count, "opened entry index");

        Ok(Self {
            log,
            conn: Mutex::new(conn),
            blocks,
            sorting,
            cache: Mutex::new(LruCache::new(capacity)),
            length: AtomicU64::new(u64::try_from(count).unwrap_or(0)),
            byte_length: AtomicU64::new(u64::try_from(bytes).unwrap_or(0)),
            fetch_size: options.fetch_size.max(1),
            fetch_timeout: options.fetch_timeout,
        })
    }

    /// The log namespace this index serves.
    #[must_use]
    pub fn log_id(&self) -> &str {
        &self.log
    }

    #[must_use]
    pub const fn sorting(&self) -> &Sorting {
        &self.sorting
    }

    #[must_use]
    pub fn blocks(&self) -> &Arc<dyn Blocks> {
        &self.blocks
    }

    /// Number of indexed entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.length.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the payload sizes of every indexed entry.
    #[must_use]
    pub fn byte_length(&self) -> u64 {
        self.byte_length.load(Ordering::SeqCst)
    }

    fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn has(&self, hash: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(exists(conn, &self.log, hash)?))
    }

    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn get_shallow(&self, hash: &str) -> Result<Option<ShallowEntry>> {
        self.with_conn(|conn| Ok(load_shallow(conn, &self.log, hash)?))
    }

    /// Every indexed entry that lists `hash` in its `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn referrers(&self, hash: &str) -> Result<Vec<ShallowEntry>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {SHALLOW_COLUMNS} FROM entries
                 WHERE log = ?1 AND hash IN (
                    SELECT hash FROM entry_next WHERE log = ?1 AND next_hash = ?2
                 )"
            );
            Ok(query_shallow(conn, &self.log, &sql, params![self.log, hash])?)
        })
    }

    /// Whether an indexed non-CUT entry lists `hash` in its `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn has_live_referrer(&self, hash: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(has_live_referrer(conn, &self.log, hash)?))
    }

    /// Whether `hash` carries a tombstone mark or an indexed CUT names it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn is_cut_off(&self, hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM tombstones WHERE log = ?1 AND hash = ?2)
                     OR EXISTS(
                        SELECT 1 FROM entry_next n
                        JOIN entries e ON e.log = n.log AND e.hash = n.hash
                        WHERE n.log = ?1 AND n.next_hash = ?2 AND e.entry_type = 1
                     )",
                params![self.log, hash],
                |row| row.get(0),
            )?)
        })
    }

    /// Mark `hash` as cut.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on failure.
    pub fn mark_tombstone(&self, hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO tombstones (log, hash) VALUES (?1, ?2)",
                params![self.log, hash],
            )?;
            Ok(())
        })
    }

    /// Whether any indexed entry of `gid` other than a CUT remains.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn gid_has_live_entries(&self, gid: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM entries WHERE log = ?1 AND gid = ?2 AND entry_type = 0
                 )",
                params![self.log, gid],
                |row| row.get(0),
            )?)
        })
    }

    /// Insert the shallow projection of `entry` and cache the entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HashMismatch`] when `to_multihash` is set and the
    /// entry's hash does not match its bytes, or [`Error::Storage`] (for
    /// example when `unique` is set for an already-indexed hash).
    pub fn put(&self, entry: &Entry<T>, options: PutOptions) -> Result<PutOutcome>
    where
        T: Serialize + Clone,
    {
        if options.to_multihash {
            entry.verify_hash()?;
        }
        let shallow = entry.to_shallow(false);

        let outcome = self.with_conn(|conn| {
            let outcome = insert_shallow(conn, &self.log, &shallow, options.unique)?;
            if outcome.inserted {
                self.length.fetch_add(1, Ordering::SeqCst);
                self.byte_length
                    .fetch_add(shallow.payload_size, Ordering::SeqCst);
            }
            Ok(outcome)
        })?;

        if outcome.inserted {
            trace!(hash = short(entry.hash()), head = outcome.head, "indexed entry");
            self.cache_put(entry.clone());
        }
        Ok(outcome)
    }

    /// Remove `hash` from the index and its bytes from the block store.
    ///
    /// Returns the removed projection, or `None` if it was not indexed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on index or block store failure.
    pub async fn delete(&self, hash: &str) -> Result<Option<ShallowEntry>>
    where
        T: Send,
    {
        let removed = self.with_conn(|conn| {
            let removed = remove_shallow(conn, &self.log, hash)?;
            if let Some(entry) = &removed {
                self.length.fetch_sub(1, Ordering::SeqCst);
                self.byte_length
                    .fetch_sub(entry.payload_size, Ordering::SeqCst);
            }
            Ok(removed)
        })?;

        if removed.is_some() {
            self.cache_pop(hash);
            self.blocks.rm(hash).await?;
            trace!(hash = short(hash), "deleted entry");
        }
        Ok(removed)
    }

    /// Drop every projection in this namespace. Stored blocks and tombstone
    /// marks are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on failure.
    pub fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM entries WHERE log = ?1", [&self.log])?;
            tx.execute("DELETE FROM entry_next WHERE log = ?1", [&self.log])?;
            tx.commit()?;
            self.length.store(0, Ordering::SeqCst);
            self.byte_length.store(0, Ordering::SeqCst);
            Ok(())
        })?;
        self.clear_cache();
        Ok(())
    }

    /// Empty the resolved-entry cache.
    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn cache_put(&self, entry: Entry<T>) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(entry.hash().to_owned(), entry);
    }

    fn cache_pop(&self, hash: &str) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(hash);
    }

    fn cache_get(&self, hash: &str) -> Option<Entry<T>>
    where
        T: Clone,
    {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Ordered access
    // -----------------------------------------------------------------------

    /// Every entry in log order.
    #[must_use]
    pub const fn iter(&self, direction: Direction) -> SortedIter<'_, T> {
        SortedIter::new(self, Filter::All, direction, None)
    }

    /// Current heads, oldest first, optionally limited to one gid.
    #[must_use]
    pub fn heads(&self, gid: Option<&str>) -> SortedIter<'_, T> {
        let filter = Filter::Heads {
            gid: gid.map(str::to_owned),
        };
        SortedIter::new(self, filter, Direction::Ascending, None)
    }

    /// # Errors
    ///
    /// Returns storage or ordering errors.
    pub fn oldest(&self) -> Result<Option<ShallowEntry>> {
        self.iter(Direction::Ascending).next().transpose()
    }

    /// # Errors
    ///
    /// Returns storage or ordering errors.
    pub fn newest(&self) -> Result<Option<ShallowEntry>> {
        self.iter(Direction::Descending).next().transpose()
    }

    /// The entry immediately before `hash` in log order.
    ///
    /// # Errors
    ///
    /// Returns storage or ordering errors.
    pub fn before(&self, hash: &str) -> Result<Option<ShallowEntry>> {
        self.neighbour(hash, Direction::Descending)
    }

    /// The entry immediately after `hash` in log order.
    ///
    /// # Errors
    ///
    /// Returns storage or ordering errors.
    pub fn after(&self, hash: &str) -> Result<Option<ShallowEntry>> {
        self.neighbour(hash, Direction::Ascending)
    }

    fn neighbour(&self, hash: &str, direction: Direction) -> Result<Option<ShallowEntry>> {
        let Some(target) = self.get_shallow(hash)? else {
            return Ok(None);
        };
        let cursor = Cursor::from(&target.meta.clock);

        let mut group = self.tie_group(&Filter::All, &cursor)?;
        self.sorting.sort(&mut group)?;
        if direction == Direction::Descending {
            group.reverse();
        }
        if let Some(pos) = group.iter().position(|e| e.hash == hash) {
            if pos + 1 < group.len() {
                return Ok(Some(group.swap_remove(pos + 1)));
            }
        }

        SortedIter::new(self, Filter::All, direction, Some(cursor))
            .next()
            .transpose()
    }

    fn page(
        &self,
        filter: &Filter,
        direction: Direction,
        after: Option<&Cursor>,
        limit: usize,
    ) -> Result<Vec<ShallowEntry>> {
        let mut sql = format!("SELECT {SHALLOW_COLUMNS} FROM entries WHERE log = ?");
        let mut values = vec![SqlValue::Text(self.log.clone())];
        filter.push_sql(&mut sql, &mut values);

        let (op, order) = match direction {
            Direction::Ascending => (">", "ASC"),
            Direction::Descending => ("<", "DESC"),
        };
        if let Some(cursor) = after {
            sql.push_str(&format!(" AND (wall_time, logical, clock_id) {op} (?, ?, ?)"));
            values.extend(cursor.params());
        }
        sql.push_str(&format!(
            " ORDER BY wall_time {order}, logical {order}, clock_id {order} LIMIT ?"
        ));
        values.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        self.with_conn(|conn| Ok(query_shallow(conn, &self.log, &sql, params_from_iter(values))?))
    }

    fn tie_group(&self, filter: &Filter, cursor: &Cursor) -> Result<Vec<ShallowEntry>> {
        let mut sql = format!("SELECT {SHALLOW_COLUMNS} FROM entries WHERE log = ?");
        let mut values = vec![SqlValue::Text(self.log.clone())];
        filter.push_sql(&mut sql, &mut values);
        sql.push_str(" AND wall_time = ? AND logical = ? AND clock_id = ?");
        values.extend(cursor.params());

        self.with_conn(|conn| Ok(query_shallow(conn, &self.log, &sql, params_from_iter(values))?))
    }
}

impl<T: DeserializeOwned + Clone> EntryIndex<T> {
    /// Resolve an indexed entry to its full form.
    ///
    /// Returns `Ok(None)` for hashes that are not indexed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingEntry`] when the entry is indexed but its
    /// bytes are gone (unless `ignore_missing`), or decode/integrity errors.
    pub async fn get(&self, hash: &str, options: ResolveOptions) -> Result<Option<Entry<T>>> {
        if !self.has(hash)? {
            return Ok(None);
        }
        self.resolve(hash, options).await
    }

    /// Resolve any entry by hash: cache first, then the block store.
    ///
    /// # Errors
    ///
    /// As for [`EntryIndex::get`].
    pub async fn resolve(&self, hash: &str, options: ResolveOptions) -> Result<Option<Entry<T>>> {
        if let Some(entry) = self.cache_get(hash) {
            return Ok(Some(entry));
        }

        let get = GetOptions {
            timeout: options.timeout.or(self.fetch_timeout),
            remote: options.remote,
        };
        let Some(bytes) = blocks::fetch(self.blocks.as_ref(), hash, get).await? else {
            if options.ignore_missing {
                return Ok(None);
            }
            return Err(Error::MissingEntry {
                hash: hash.to_owned(),
            });
        };

        let entry = Entry::from_bytes(hash, &bytes)?;
        self.cache_put(entry.clone());
        Ok(Some(entry))
    }
}

// ---------------------------------------------------------------------------
// SQL helpers
// ---------------------------------------------------------------------------

fn exists(conn: &Connection, log: &str, hash: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entries WHERE log = ?1 AND hash = ?2)",
        params![log, hash],
        |row| row.get(0),
    )
}

fn has_live_referrer(conn: &Connection, log: &str, hash: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM entry_next n
            JOIN entries e ON e.log = n.log AND e.hash = n.hash
            WHERE n.log = ?1 AND n.next_hash = ?2 AND e.entry_type = 0
        )",
        params![log, hash],
        |row| row.get(0),
    )
}

fn load_shallow(
    conn: &Connection,
    log: &str,
    hash: &str,
) -> rusqlite::Result<Option<ShallowEntry>> {
    let sql = format!("SELECT {SHALLOW_COLUMNS} FROM entries WHERE log = ?1 AND hash = ?2");
    let Some(mut entry) = conn
        .query_row(&sql, params![log, hash], read_row)
        .optional()?
    else {
        return Ok(None);
    };
    entry.meta.next = load_next(conn, log, hash)?;
    Ok(Some(entry))
}

fn load_next(conn: &Connection, log: &str, hash: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT next_hash FROM entry_next WHERE log = ?1 AND hash = ?2 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![log, hash], |row| row.get(0))?;
    rows.collect()
}

fn query_shallow(
    conn: &Connection,
    log: &str,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<ShallowEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let mut entries = stmt
        .query_map(params, read_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for entry in &mut entries {
        entry.meta.next = load_next(conn, log, &entry.hash)?;
    }
    Ok(entries)
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<ShallowEntry> {
    let raw_type: i64 = row.get(5)?;
    let entry_type = EntryType::from_i64(raw_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Integer,
            format!("unknown entry type {raw_type}").into(),
        )
    })?;
    let logical: i64 = row.get(4)?;
    let logical = u32::try_from(logical)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Integer, Box::new(e)))?;
    let payload_size: i64 = row.get(7)?;

    Ok(ShallowEntry {
        hash: row.get(0)?,
        meta: Meta {
            clock: Clock::new(
                row.get(2)?,
                Timestamp::new(wall_from_sql(row.get(3)?), logical),
            ),
            gid: row.get(1)?,
            next: Vec::new(),
            entry_type,
            data: row.get(8)?,
        },
        head: row.get(6)?,
        payload_size: u64::try_from(payload_size).unwrap_or(0),
    })
}

fn insert_shallow(
    conn: &mut Connection,
    log: &str,
    entry: &ShallowEntry,
    unique: bool,
) -> Result<PutOutcome> {
    let tx = conn.transaction()?;
    if !unique && exists(&tx, log, &entry.hash)? {
        return Ok(PutOutcome::default());
    }

    let head = !has_live_referrer(&tx, log, &entry.hash)?;
    let clock = &entry.meta.clock;
    tx.execute(
        "DELETE FROM tombstones WHERE log = ?1 AND hash = ?2",
        params![log, entry.hash],
    )?;
    tx.execute(
        "INSERT INTO entries (
            log, hash, gid, clock_id, wall_time, logical,
            entry_type, head, payload_size, meta_data
         )
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            log,
            entry.hash,
            entry.meta.gid,
            clock.id,
            wall_to_sql(clock.timestamp.wall_time),
            i64::from(clock.timestamp.logical),
            entry.meta.entry_type.as_i64(),
            head,
            i64::try_from(entry.payload_size).unwrap_or(i64::MAX),
            entry.meta.data,
        ],
    )?;
    for (position, next) in entry.meta.next.iter().enumerate() {
        tx.execute(
            "INSERT INTO entry_next (log, hash, position, next_hash) VALUES (?1, ?2, ?3, ?4)",
            params![
                log,
                entry.hash,
                i64::try_from(position).unwrap_or(i64::MAX),
                next
            ],
        )?;
    }

    let mut removed_gids = Vec::new();
    if !entry.meta.is_cut() {
        let mut parent_gids = BTreeSet::new();
        for next in &entry.meta.next {
            tx.execute(
                "UPDATE entries SET head = 0 WHERE log = ?1 AND hash = ?2",
                params![log, next],
            )?;
            let gid: Option<String> = tx
                .query_row(
                    "SELECT gid FROM entries WHERE log = ?1 AND hash = ?2",
                    params![log, next],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(gid) = gid.filter(|g| *g != entry.meta.gid) {
                parent_gids.insert(gid);
            }
        }
        for gid in parent_gids {
            let has_head: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM entries WHERE log = ?1 AND gid = ?2 AND head = 1)",
                params![log, gid],
                |row| row.get(0),
            )?;
            if !has_head {
                removed_gids.push(gid);
            }
        }
    }

    tx.commit()?;
    Ok(PutOutcome {
        inserted: true,
        head,
        removed_gids,
    })
}

fn remove_shallow(conn: &mut Connection, log: &str, hash: &str) -> Result<Option<ShallowEntry>> {
    let tx = conn.transaction()?;
    let Some(entry) = load_shallow(&tx, log, hash)? else {
        return Ok(None);
    };

    tx.execute(
        "DELETE FROM entries WHERE log = ?1 AND hash = ?2",
        params![log, hash],
    )?;
    tx.execute(
        "DELETE FROM entry_next WHERE log = ?1 AND hash = ?2",
        params![log, hash],
    )?;

    if !entry.meta.is_cut() {
        for parent in &entry.meta.next {
            if exists(&tx, log, parent)? && !has_live_referrer(&tx, log, parent)? {
                tx.execute(
                    "UPDATE entries SET head = 1 WHERE log = ?1 AND hash = ?2",
                    params![log, parent],
                )?;
            }
        }
    }

    tx.commit()?;
    Ok(Some(entry))
}
