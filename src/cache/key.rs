//! Cache key derivation

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Hex characters of the digest kept in a key
const DIGEST_CHARS: usize = 32;

/// Contributed to the fingerprint in place of a missing file
const MISSING_FILE_TAG: [u8; 1] = [0];

/// An opaque, filename-safe cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a job from its variables and a dependency fingerprint
    ///
    /// Depends only on its inputs: the same variables and fingerprint always
    /// produce the same key.
    pub fn derive(prefix: &str, variables: &BTreeMap<String, String>, fingerprint: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((variables.len() as u64).to_le_bytes());
        for (name, value) in variables {
            update_field(&mut hasher, name.as_bytes());
            update_field(&mut hasher, value.as_bytes());
        }
        update_field(&mut hasher, fingerprint);

        let digest = hex::encode(hasher.finalize());
        CacheKey(format!("{}-{}", sanitize_key(prefix), &digest[..DIGEST_CHARS]))
    }

    /// Wrap an existing key, e.g. one read back from a store
    pub fn from_raw(key: impl Into<String>) -> Self {
        CacheKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 over the contents of `files`, read relative to `workdir`
pub async fn fingerprint_files(workdir: &Path, files: &[String]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for file in files {
        update_field(&mut hasher, file.as_bytes());
        match tokio::fs::read(workdir.join(file)).await {
            Ok(contents) => {
                hasher.update([1u8]);
                update_field(&mut hasher, &contents);
            }
            Err(_) => hasher.update(MISSING_FILE_TAG),
        }
    }
    hasher.finalize().to_vec()
}

/// Length-prefixed, so adjacent fields cannot run into each other
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Hex SHA-256 of a blob
pub fn digest(blob: &[u8]) -> String {
    hex::encode(Sha256::digest(blob))
}

/// Replace characters that are unsafe in filenames
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            _ => c,
        })
        .collect()
}
