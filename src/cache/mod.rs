//! Cache broker: deterministic keys, content-checked puts, LRU eviction
//!
//! The broker keeps an index of every stored blob (size, content digest,
//! logical last-use time) in front of a [`BlobStore`]. Writes and evictions
//! are serialized through the index lock; reads only hold it long enough to
//! record the access.

pub mod archive;
pub mod key;
pub mod store;

use crate::core::CiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use key::{fingerprint_files, CacheKey};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, StoredBlob};

/// Default byte budget: 2 GiB
pub const DEFAULT_BUDGET_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// What a successful `put` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New entry written
    Stored,
    /// Identical content already present; nothing changed
    Unchanged,
    /// Blob exceeds the whole budget; not stored
    Oversized,
}

/// A listed cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    size: u64,
    /// Hex SHA-256, computed lazily for entries found on open
    digest: Option<String>,
    created_at: DateTime<Utc>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: HashMap<CacheKey, IndexEntry>,
    clock: u64,
    total_bytes: u64,
}

impl CacheIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn touch(&mut self, key: &CacheKey) {
        let now = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = now;
        }
    }

    fn insert(&mut self, key: CacheKey, mut entry: IndexEntry) {
        entry.last_used = self.tick();
        self.total_bytes += entry.size;
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_bytes -= old.size;
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<IndexEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size;
        Some(entry)
    }

    fn least_recently_used(&self) -> Option<CacheKey> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
    }
}

/// Shared cache in front of a blob store, passed explicitly to executors
pub struct CacheBroker {
    store: Arc<dyn BlobStore>,
    budget_bytes: u64,
    index: Mutex<CacheIndex>,
}

impl CacheBroker {
    /// Open a broker over `store`, indexing what it already holds
    ///
    /// Existing blobs are ordered oldest-modified first, so they are the
    /// first to go if the store is over budget.
    pub async fn open(store: Arc<dyn BlobStore>, budget_bytes: u64) -> Result<Self, CiError> {
        let mut existing = store.list().await?;
        existing.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.key.cmp(&b.key)));

        let mut index = CacheIndex::default();
        for blob in existing {
            index.insert(
                blob.key,
                IndexEntry {
                    size: blob.size,
                    digest: None,
                    created_at: blob.modified,
                    last_used: 0,
                },
            );
        }

        debug!(
            "Opened cache with {} entries ({} bytes, budget {})",
            index.entries.len(),
            index.total_bytes,
            budget_bytes
        );

        let broker = Self {
            store,
            budget_bytes,
            index: Mutex::new(index),
        };
        {
            let mut index = broker.index.lock().await;
            broker.evict_until_fits(&mut index, 0).await;
        }
        Ok(broker)
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    pub async fn total_bytes(&self) -> u64 {
        self.index.lock().await.total_bytes
    }

    /// Fetch a blob; unknown keys and store errors are a miss
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        {
            let mut index = self.index.lock().await;
            if !index.entries.contains_key(key) {
                return None;
            }
            index.touch(key);
        }

        match self.store.get(key).await {
            Ok(Some(blob)) => Some(blob),
            Ok(None) => {
                warn!("Cache entry {} vanished from the store", key);
                self.index.lock().await.remove(key);
                None
            }
            Err(e) => {
                warn!("Failed to read cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Store `blob` under `key`
    ///
    /// Identical content under an existing key is a no-op. Different content
    /// is refused with [`CiError::CacheCorruption`] and the stored entry is
    /// left untouched.
    pub async fn put(&self, key: &CacheKey, blob: &[u8]) -> Result<PutOutcome, CiError> {
        let digest = key::digest(blob);
        let size = blob.len() as u64;
        let mut index = self.index.lock().await;

        if index.entries.contains_key(key) {
            match self.stored_digest(&mut index, key).await? {
                Some(existing) if existing == digest => {
                    debug!("Cache entry {} already holds identical content", key);
                    return Ok(PutOutcome::Unchanged);
                }
                Some(_) => {
                    warn!("Refusing to overwrite cache entry {} with different content", key);
                    return Err(CiError::CacheCorruption {
                        key: key.to_string(),
                    });
                }
                None => {}
            }
        }

        if size > self.budget_bytes {
            warn!(
                "Cache blob for {} is {} bytes, larger than the {} byte budget; not storing",
                key, size, self.budget_bytes
            );
            return Ok(PutOutcome::Oversized);
        }

        self.evict_until_fits(&mut index, size).await;
        self.store.put(key, blob).await?;
        index.insert(
            key.clone(),
            IndexEntry {
                size,
                digest: Some(digest),
                created_at: Utc::now(),
                last_used: 0,
            },
        );

        info!("Saved cache entry {} ({} bytes)", key, size);
        Ok(PutOutcome::Stored)
    }

    /// Entries sorted by key
    pub async fn entries(&self) -> Vec<CacheEntry> {
        let index = self.index.lock().await;
        let mut entries: Vec<CacheEntry> = index
            .entries
            .iter()
            .map(|(key, e)| CacheEntry {
                key: key.clone(),
                size: e.size,
                created_at: e.created_at,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Digest of the stored content, loading it if unknown
    ///
    /// `None` means the store no longer holds the blob; the index entry is
    /// dropped in that case.
    async fn stored_digest(
        &self,
        index: &mut CacheIndex,
        key: &CacheKey,
    ) -> Result<Option<String>, CiError> {
        if let Some(digest) = index.entries.get(key).and_then(|e| e.digest.clone()) {
            return Ok(Some(digest));
        }

        match self.store.get(key).await? {
            Some(existing) => {
                let digest = key::digest(&existing);
                if let Some(entry) = index.entries.get_mut(key) {
                    entry.digest = Some(digest.clone());
                }
                Ok(Some(digest))
            }
            None => {
                index.remove(key);
                Ok(None)
            }
        }
    }

    /// Evict least recently used entries until `incoming` more bytes fit
    ///
    /// Deletion failures are logged and never propagated.
    async fn evict_until_fits(&self, index: &mut CacheIndex, incoming: u64) {
        while index.total_bytes + incoming > self.budget_bytes {
            let Some(victim) = index.least_recently_used() else {
                break;
            };
            if let Err(e) = self.store.delete(&victim).await {
                warn!("Failed to evict cache entry {}: {}", victim, e);
            }
            if let Some(entry) = index.remove(&victim) {
                debug!("Evicted cache entry {} ({} bytes)", victim, entry.size);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn key(name: &str) -> CacheKey {
        CacheKey::from_raw(name)
    }

    async fn broker(budget: u64) -> (Arc<MemoryBlobStore>, CacheBroker) {
        let store = Arc::new(MemoryBlobStore::new());
        let broker = CacheBroker::open(store.clone(), budget).await.unwrap();
        (store, broker)
    }

    #[tokio::test]
    async fn test_get_unknown_key_is_none() {
        let (_, broker) = broker(1024).await;
        assert!(broker.get(&key("missing")).await.is_none());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_, broker) = broker(1024).await;
        assert_eq!(broker.put(&key("a"), b"blob").await.unwrap(), PutOutcome::Stored);
        assert_eq!(broker.get(&key("a")).await, Some(b"blob".to_vec()));
    }

    #[tokio::test]
    async fn test_identical_put_is_noop() {
        let (store, broker) = broker(1024).await;
        broker.put(&key("a"), b"blob").await.unwrap();
        let before = store.list().await.unwrap();

        assert_eq!(
            broker.put(&key("a"), b"blob").await.unwrap(),
            PutOutcome::Unchanged
        );
        assert_eq!(store.list().await.unwrap(), before);
        assert_eq!(broker.total_bytes().await, 4);
    }

    #[tokio::test]
    async fn test_different_content_is_refused() {
        let (store, broker) = broker(1024).await;
        broker.put(&key("a"), b"original").await.unwrap();

        let err = broker.put(&key("a"), b"tampered").await.unwrap_err();
        assert!(matches!(err, CiError::CacheCorruption { .. }));
        assert_eq!(
            store.get(&key("a")).await.unwrap(),
            Some(b"original".to_vec())
        );
    }

    #[tokio::test]
    async fn test_lru_eviction_under_budget() {
        let (_, broker) = broker(10).await;
        broker.put(&key("a"), b"aaaa").await.unwrap();
        broker.put(&key("b"), b"bbbb").await.unwrap();

        // Touch `a` so `b` becomes least recently used
        assert!(broker.get(&key("a")).await.is_some());

        broker.put(&key("c"), b"cccc").await.unwrap();

        assert!(broker.get(&key("b")).await.is_none());
        assert!(broker.get(&key("a")).await.is_some());
        assert!(broker.get(&key("c")).await.is_some());
        assert!(broker.total_bytes().await <= 10);
    }

    #[tokio::test]
    async fn test_oversized_blob_is_not_stored() {
        let (store, broker) = broker(4).await;
        broker.put(&key("small"), b"ok").await.unwrap();

        assert_eq!(
            broker.put(&key("big"), b"too large").await.unwrap(),
            PutOutcome::Oversized
        );
        assert!(broker.get(&key("big")).await.is_none());
        // Nothing was evicted to make room
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_open_indexes_existing_blobs() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put(&key("a"), b"blob").await.unwrap();

        let broker = CacheBroker::open(store.clone(), 1024).await.unwrap();
        assert_eq!(broker.entries().await.len(), 1);
        assert_eq!(broker.get(&key("a")).await, Some(b"blob".to_vec()));

        // Digest is loaded lazily for entries found on open
        assert_eq!(broker.put(&key("a"), b"blob").await.unwrap(), PutOutcome::Unchanged);
        assert!(broker.put(&key("a"), b"other").await.is_err());
    }

    #[tokio::test]
    async fn test_open_evicts_when_over_budget() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put(&key("a"), b"aaaa").await.unwrap();
        store.put(&key("b"), b"bbbb").await.unwrap();

        let broker = CacheBroker::open(store.clone(), 4).await.unwrap();
        assert_eq!(broker.entries().await.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    struct FailingDelete {
        inner: MemoryBlobStore,
    }

    #[async_trait]
    impl BlobStore for FailingDelete {
        async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CiError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &CacheKey, blob: &[u8]) -> Result<(), CiError> {
            self.inner.put(key, blob).await
        }

        async fn delete(&self, _key: &CacheKey) -> Result<(), CiError> {
            Err(CiError::Io(std::io::Error::other("read-only store")))
        }

        async fn list(&self) -> Result<Vec<StoredBlob>, CiError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_eviction_failure_does_not_fail_put() {
        let store = Arc::new(FailingDelete {
            inner: MemoryBlobStore::new(),
        });
        let broker = CacheBroker::open(store, 4).await.unwrap();

        broker.put(&key("a"), b"aaaa").await.unwrap();
        assert_eq!(broker.put(&key("b"), b"bbbb").await.unwrap(), PutOutcome::Stored);
    }
}
