//! In-memory block store.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::trace;

use super::{Blocks, GetOptions};
use crate::error::Result;
use crate::hash::{content_address, short};

/// Block store backed by a `RwLock<HashMap>`.
#[derive(Debug, Default)]
pub struct MemoryBlocks {
    blocks: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite the bytes under `hash` without re-addressing them.
    ///
    /// Only useful for corrupting a store in tests.
    #[doc(hidden)]
    pub fn insert_raw(&self, hash: &str, bytes: Vec<u8>) {
        self.blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash.to_owned(), bytes);
    }
}

#[async_trait::async_trait]
impl Blocks for MemoryBlocks {
    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        let hash = content_address(&bytes);
        trace!(hash = short(&hash), size = bytes.len(), "storing block in memory");
        self.blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(hash.clone())
            .or_insert(bytes);
        Ok(hash)
    }

    async fn get(&self, hash: &str, _options: GetOptions) -> Result<Option<Vec<u8>>> {
        let map = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(hash).cloned())
    }

    async fn rm(&self, hash: &str) -> Result<()> {
        self.blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(hash);
        Ok(())
    }

    async fn has(&self, hash: &str) -> Result<bool> {
        let map = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.contains_key(hash))
    }

    async fn iter(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let map = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemoryBlocks::new();
        let hash = store.put(b"hello block".to_vec()).await.expect("put");
        assert_eq!(hash, content_address(b"hello block"));
        let got = store.get(&hash, GetOptions::local()).await.expect("get");
        assert_eq!(got.as_deref(), Some(&b"hello block"[..]));
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let store = MemoryBlocks::new();
        let a = store.put(b"same".to_vec()).await.expect("put");
        let b = store.put(b"same".to_vec()).await.expect("put");
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn rm_then_get_is_none() {
        let store = MemoryBlocks::new();
        let hash = store.put(b"gone".to_vec()).await.expect("put");
        store.rm(&hash).await.expect("rm");
        assert!(!store.has(&hash).await.expect("has"));
        assert_eq!(store.get(&hash, GetOptions::local()).await.expect("get"), None);
        store.rm(&hash).await.expect("removing twice is fine");
    }

    #[tokio::test]
    async fn iter_lists_every_block() {
        let store = MemoryBlocks::new();
        let mut expected = vec![
            store.put(b"one".to_vec()).await.expect("put"),
            store.put(b"two".to_vec()).await.expect("put"),
        ];
        let mut listed: Vec<String> = store
            .iter()
            .await
            .expect("iter")
            .into_iter()
            .map(|(hash, _)| hash)
            .collect();
        listed.sort();
        expected.sort();
        assert_eq!(listed, expected);
    }
}
