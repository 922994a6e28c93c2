//! Blob storage backends for the cache

use crate::cache::key::CacheKey;
use crate::core::CiError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// File extension for stored blobs
const BLOB_EXTENSION: &str = "blob";

/// Metadata for a blob held by a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: CacheKey,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Get/put by opaque key
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob, `None` if absent
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CiError>;

    /// Store a blob; readers never observe a partial write
    async fn put(&self, key: &CacheKey, blob: &[u8]) -> Result<(), CiError>;

    /// Remove a blob; removing an absent key is not an error
    async fn delete(&self, key: &CacheKey) -> Result<(), CiError>;

    /// Every blob currently held
    async fn list(&self) -> Result<Vec<StoredBlob>, CiError>;
}

/// In-memory blob store
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<CacheKey, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CiError> {
        Ok(self.blobs.read().await.get(key).map(|(blob, _)| blob.clone()))
    }

    async fn put(&self, key: &CacheKey, blob: &[u8]) -> Result<(), CiError> {
        self.blobs
            .write()
            .await
            .insert(key.clone(), (blob.to_vec(), Utc::now()));
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CiError> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredBlob>, CiError> {
        Ok(self
            .blobs
            .read()
            .await
            .iter()
            .map(|(key, (blob, modified))| StoredBlob {
                key: key.clone(),
                size: blob.len() as u64,
                modified: *modified,
            })
            .collect())
    }
}

/// Directory of blob files, one per key
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CiError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{}.{}", key.as_str(), BLOB_EXTENSION))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CiError> {
        match tokio::fs::read(self.blob_path(key)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &CacheKey, blob: &[u8]) -> Result<(), CiError> {
        let root = self.root.clone();
        let target = self.blob_path(key);
        let blob = blob.to_vec();

        // Temp file in the same directory, so the rename stays on one filesystem
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&root)?;
            tmp.write_all(&blob)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!("Stored cache blob {}", key);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CiError> {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<StoredBlob>, CiError> {
        let mut blobs = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let metadata = entry.metadata().await?;
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            blobs.push(StoredBlob {
                key: CacheKey::from_raw(stem),
                size: metadata.len(),
                modified,
            });
        }

        Ok(blobs)
    }
}
