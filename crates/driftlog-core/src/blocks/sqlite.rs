//! SQLite-backed block store.
//!
//! Bytes live once per file in `blocks`; `block_owners` records which logs
//! stored them. A store only sees its own owner's blocks, and `rm` drops the
//! bytes once no owner is left.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::trace;

use super::{Blocks, GetOptions};
use crate::db;
use crate::error::Result;
use crate::hash::{content_address, short};

/// Owner used by stores that were not scoped to a log.
const SHARED_OWNER: &str = "shared";

/// Block store persisted in the `blocks` table of a driftlog database.
pub struct SqliteBlocks {
    conn: Mutex<Connection>,
    owner: String,
}

impl std::fmt::Debug for SqliteBlocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBlocks")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl SqliteBlocks {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the database cannot be opened or
    /// migrated.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(db::open(path)?))
    }

    /// Private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if migration fails.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(db::open_in_memory()?))
    }

    /// Wrap an already-migrated connection.
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            owner: SHARED_OWNER.to_owned(),
        }
    }

    /// Scope the store to `owner`, usually a log id.
    #[must_use]
    pub fn for_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> rusqlite::Result<R>) -> Result<R> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut conn)?)
    }
}

#[async_trait::async_trait]
impl Blocks for SqliteBlocks {
    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        let hash = content_address(&bytes);
        trace!(
            hash = short(&hash),
            size = bytes.len(),
            owner = %self.owner,
            "storing block in sqlite"
        );
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO blocks (hash, bytes) VALUES (?1, ?2)",
                params![hash, bytes],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO block_owners (owner, hash) VALUES (?1, ?2)",
                params![self.owner, hash],
            )?;
            tx.commit()
        })?;
        Ok(hash)
    }

    async fn get(&self, hash: &str, _options: GetOptions) -> Result<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT b.bytes FROM blocks b
                 JOIN block_owners o ON o.hash = b.hash
                 WHERE o.owner = ?1 AND b.hash = ?2",
                params![self.owner, hash],
                |row| row.get(0),
            )
            .optional()
        })
    }

    async fn rm(&self, hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM block_owners WHERE owner = ?1 AND hash = ?2",
                params![self.owner, hash],
            )?;
            tx.execute(
                "DELETE FROM blocks WHERE hash = ?1
                 AND NOT EXISTS (SELECT 1 FROM block_owners WHERE hash = ?1)",
                [hash],
            )?;
            tx.commit()
        })?;
        Ok(())
    }

    async fn has(&self, hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM block_owners o
                    JOIN blocks b ON b.hash = o.hash
                    WHERE o.owner = ?1 AND o.hash = ?2
                 )",
                params![self.owner, hash],
                |row| row.get(0),
            )
        })
    }

    async fn iter(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.hash, b.bytes FROM blocks b
                 JOIN block_owners o ON o.hash = b.hash
                 WHERE o.owner = ?1
                 ORDER BY b.hash",
            )?;
            let rows = stmt.query_map([&self.owner], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocks_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blocks.sqlite3");

        let hash = {
            let store = SqliteBlocks::open(&path).expect("open");
            store.put(b"durable".to_vec()).await.expect("put")
        };

        let store = SqliteBlocks::open(&path).expect("reopen");
        assert!(store.has(&hash).await.expect("has"));
        let got = store.get(&hash, GetOptions::local()).await.expect("get");
        assert_eq!(got.as_deref(), Some(&b"durable"[..]));
    }

    #[tokio::test]
    async fn rm_and_iter() {
        let store = SqliteBlocks::open_in_memory().expect("open");
        let keep = store.put(b"keep".to_vec()).await.expect("put");
        let gone = store.put(b"drop".to_vec()).await.expect("put");
        store.rm(&gone).await.expect("rm");

        let listed = store.iter().await.expect("iter");
        assert_eq!(listed, vec![(keep, b"keep".to_vec())]);
    }

    #[tokio::test]
    async fn owners_share_bytes_but_not_listings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shared.sqlite3");
        let a = SqliteBlocks::open(&path).expect("open").for_owner("log-a");
        let b = SqliteBlocks::open(&path).expect("open").for_owner("log-b");

        let common = a.put(b"common".to_vec()).await.expect("put");
        b.put(b"common".to_vec()).await.expect("put");
        let only_a = a.put(b"only a".to_vec()).await.expect("put");

        let listed: Vec<String> = b
            .iter()
            .await
            .expect("iter")
            .into_iter()
            .map(|(hash, _)| hash)
            .collect();
        assert_eq!(listed, vec![common.clone()]);
        assert!(!b.has(&only_a).await.expect("has"));

        a.rm(&common).await.expect("rm");
        assert!(!a.has(&common).await.expect("has"));
        let got = b.get(&common, GetOptions::local()).await.expect("get");
        assert_eq!(got.as_deref(), Some(&b"common"[..]), "b still owns the bytes");

        b.rm(&common).await.expect("rm");
        let raw = SqliteBlocks::from_connection(db::open(&path).expect("db"));
        let bytes_left: i64 = raw
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM blocks WHERE hash = ?1", [&common], |row| {
                    row.get(0)
                })
            })
            .expect("count");
        assert_eq!(bytes_left, 0);
    }
}
