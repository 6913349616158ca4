//! Content-addressed block storage.
//!
//! The log persists every entry's canonical bytes through a [`Blocks`]
//! implementation and fetches them back by content address. Stores decide
//! the address themselves (see [`crate::hash::content_address`]) so a caller
//! can check that the address it computed agrees with the store's.
//!
//! # Implementations
//!
//! - [`MemoryBlocks`]: `RwLock<HashMap>`, for tests and ephemeral logs.
//! - [`SqliteBlocks`]: the `blocks` table of a driftlog database file,
//!   scoped to one owning log.
//! - [`LayeredBlocks`]: a local store with a remote fallback consulted only
//!   when [`GetOptions::remote`] is set; fetched blocks are cached locally.

mod memory;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::hash::{short, verify_content_address};

pub use memory::MemoryBlocks;
pub use sqlite::SqliteBlocks;

/// Options for a single block fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Give up after this long; a timed-out fetch reads as missing.
    pub timeout: Option<Duration>,
    /// Allow the store to go beyond local storage.
    pub remote: bool,
}

impl GetOptions {
    #[must_use]
    pub const fn local() -> Self {
        Self {
            timeout: None,
            remote: false,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }
}

/// Content-addressed key/value storage for serialized entries.
///
/// All implementations must be `Send + Sync` so a log can be driven from
/// several tasks at once.
#[async_trait::async_trait]
pub trait Blocks: Send + Sync {
    /// Store `bytes` and return their content address.
    async fn put(&self, bytes: Vec<u8>) -> Result<String>;

    /// Fetch the bytes stored under `hash`, or `None` if absent.
    async fn get(&self, hash: &str, options: GetOptions) -> Result<Option<Vec<u8>>>;

    /// Remove the block stored under `hash`. Removing an absent block is not
    /// an error.
    async fn rm(&self, hash: &str) -> Result<()>;

    /// Whether a block is stored locally under `hash`.
    async fn has(&self, hash: &str) -> Result<bool>;

    /// Every locally stored `(hash, bytes)` pair.
    async fn iter(&self) -> Result<Vec<(String, Vec<u8>)>>;
}

/// Fetch through `blocks`, honouring `options.timeout` and checking that the
/// returned bytes match `hash`.
///
/// # Errors
///
/// Propagates store errors and returns [`crate::Error::HashMismatch`] for
/// bytes that do not hash to `hash`. A timeout is not an error: it yields
/// `Ok(None)`.
pub async fn fetch(
    blocks: &dyn Blocks,
    hash: &str,
    options: GetOptions,
) -> Result<Option<Vec<u8>>> {
    let bytes = match options.timeout {
        Some(limit) => {
            if let Ok(result) = tokio::time::timeout(limit, blocks.get(hash, options)).await {
                result?
            } else {
                tracing::debug!(hash = short(hash), ?limit, "block fetch timed out");
                return Ok(None);
            }
        }
        None => blocks.get(hash, options).await?,
    };

    if let Some(bytes) = &bytes {
        verify_content_address(hash, bytes)?;
    }
    Ok(bytes)
}

/// A local store backed by a remote one for fetches that allow it.
pub struct LayeredBlocks {
    local: Arc<dyn Blocks>,
    remote: Arc<dyn Blocks>,
}

impl LayeredBlocks {
    #[must_use]
    pub fn new(local: Arc<dyn Blocks>, remote: Arc<dyn Blocks>) -> Self {
        Self { local, remote }
    }
}

#[async_trait::async_trait]
impl Blocks for LayeredBlocks {
    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        self.local.put(bytes).await
    }

    async fn get(&self, hash: &str, options: GetOptions) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.local.get(hash, options).await? {
            return Ok(Some(bytes));
        }
        if !options.remote {
            return Ok(None);
        }

        let Some(bytes) = self.remote.get(hash, options).await? else {
            return Ok(None);
        };
        verify_content_address(hash, &bytes)?;
        self.local.put(bytes.clone()).await?;
        tracing::trace!(hash = short(hash), "cached remote block locally");
        Ok(Some(bytes))
    }

    async fn rm(&self, hash: &str) -> Result<()> {
        self.local.rm(hash).await
    }

    async fn has(&self, hash: &str) -> Result<bool> {
        self.local.has(hash).await
    }

    async fn iter(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.local.iter().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hash::content_address;

    struct Stalled;

    #[async_trait::async_trait]
    impl Blocks for Stalled {
        async fn put(&self, bytes: Vec<u8>) -> Result<String> {
            Ok(content_address(&bytes))
        }
        async fn get(&self, _hash: &str, _options: GetOptions) -> Result<Option<Vec<u8>>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
        async fn rm(&self, _hash: &str) -> Result<()> {
            Ok(())
        }
        async fn has(&self, _hash: &str) -> Result<bool> {
            Ok(false)
        }
        async fn iter(&self) -> Result<Vec<(String, Vec<u8>)>> {
            Ok(Vec::new())
        }
    }

    struct Lying;

    #[async_trait::async_trait]
    impl Blocks for Lying {
        async fn put(&self, bytes: Vec<u8>) -> Result<String> {
            Ok(content_address(&bytes))
        }
        async fn get(&self, _hash: &str, _options: GetOptions) -> Result<Option<Vec<u8>>> {
            Ok(Some(b"not what you asked for".to_vec()))
        }
        async fn rm(&self, _hash: &str) -> Result<()> {
            Ok(())
        }
        async fn has(&self, _hash: &str) -> Result<bool> {
            Ok(true)
        }
        async fn iter(&self) -> Result<Vec<(String, Vec<u8>)>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn fetch_timeout_reads_as_missing() {
        let options = GetOptions::local().with_timeout(Some(Duration::from_millis(50)));
        let got = fetch(&Stalled, "blake3:00", options).await.expect("fetch");
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn fetch_rejects_mismatched_bytes() {
        let err = fetch(&Lying, &content_address(b"x"), GetOptions::local())
            .await
            .expect_err("mismatch");
        assert!(matches!(err, Error::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn layered_only_goes_remote_when_asked() {
        let local = Arc::new(MemoryBlocks::new());
        let remote = Arc::new(MemoryBlocks::new());
        let hash = remote.put(b"remote block".to_vec()).await.expect("put");
        let layered = LayeredBlocks::new(local.clone(), remote);

        assert_eq!(layered.get(&hash, GetOptions::local()).await.expect("get"), None);

        let got = layered
            .get(&hash, GetOptions::local().with_remote(true))
            .await
            .expect("get");
        assert_eq!(got.as_deref(), Some(&b"remote block"[..]));
        assert!(local.has(&hash).await.expect("has"), "remote block cached locally");
    }
}
