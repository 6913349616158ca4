//! SQLite connection utilities shared by [`crate::blocks::SqliteBlocks`] and
//! [`crate::index::EntryIndex`].
//!
//! Runtime pragmas:
//! - `journal_mode = WAL` so the block store and the index can hold separate
//!   connections to one file
//! - `busy_timeout = 5s` to absorb transient lock contention
//! - `synchronous = NORMAL`

pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use std::{path::Path, time::Duration};

use crate::error::{Result, storage_err};

/// Busy timeout applied to every connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) a database file, apply pragmas, and migrate it.
///
/// # Errors
///
/// Returns [`crate::Error::Storage`] if the directory cannot be created or
/// opening, configuring, or migrating the database fails.
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            storage_err(format!("create database directory {}: {e}", parent.display()))
        })?;
    }

    let mut conn = Connection::open(path)
        .map_err(|e| storage_err(format!("open database {}: {e}", path.display())))?;
    configure_connection(&conn)?;
    migrations::migrate(&mut conn)?;
    Ok(conn)
}

/// Open a private in-memory database with the schema applied.
///
/// # Errors
///
/// Returns [`crate::Error::Storage`] if migration fails.
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory()?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    migrations::migrate(&mut conn)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Order-preserving map from `u64` wall time to SQLite's signed integers.
#[must_use]
pub const fn wall_to_sql(wall_time: u64) -> i64 {
    i64::from_ne_bytes((wall_time ^ (1 << 63)).to_ne_bytes())
}

/// Inverse of [`wall_to_sql`].
#[must_use]
pub const fn wall_from_sql(value: i64) -> u64 {
    u64::from_ne_bytes(value.to_ne_bytes()) ^ (1 << 63)
}
