//! Path-keyed hash cache (spec.md §4.5, glossary "Hash cache"): skips
//! re-hashing a file whose length and modification time haven't changed
//! since the last time it was hashed.
//!
//! Two instances live on [`crate::engine::AssetEngine`]: a local one keyed
//! by absolute filesystem path and persisted to a temp file, and a remote
//! one under `.db/hash-cache` in the metadata storage, keyed the same way
//! but shaped to survive a full database reload. Both use this one type.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::storage::Backend;
use crate::util::fs as ufs;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: [u8; 32],
    pub length: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashCache {
    entries: HashMap<String, CacheEntry>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached hash for `path` iff its current `length`/
    /// `last_modified` still match what was cached (spec.md §4.5 step 1).
    pub fn fresh_hash(&self, path: &str, length: u64, last_modified: DateTime<Utc>) -> Option<[u8; 32]> {
        let entry = self.entries.get(path)?;
        (entry.length == length && entry.last_modified == last_modified).then_some(entry.hash)
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: CacheEntry) {
        self.entries.insert(path.into(), entry);
    }

    /// Loads from a local temp file. Missing or corrupt files are not an
    /// error — the cache just starts cold (spec.md §4.5 implies no fatal
    /// failure mode for a cache, only a cost in re-hashing).
    pub fn load_from_file(path: impl AsRef<Path>) -> Self {
        match ufs::read(path.as_ref()) {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// Saves to a local temp file. Failures are logged and swallowed
    /// (spec.md §4.5 "Hash-cache saves retry silently (swallow)").
    pub fn save_to_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Ok(bytes) = serde_json::to_vec(self) else {
            log::warn!("failed to serialize hash cache for {:?}", path);
            return;
        };
        if let Err(err) = ufs::write_atomic(path, &bytes) {
            log::warn!("failed to persist hash cache to {:?}: {}", path, err);
        }
    }

    /// Loads from `.db/hash-cache` in a `Backend` (the "remote" cache).
    pub async fn load_from_backend(backend: &dyn Backend, path: &str) -> Self {
        match backend.read(path).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// Saves to `.db/hash-cache` in a `Backend`, swallowing failures the
    /// same way [`HashCache::save_to_file`] does.
    pub async fn save_to_backend(&self, backend: &dyn Backend, path: &str) {
        let Ok(bytes) = serde_json::to_vec(self) else {
            log::warn!("failed to serialize remote hash cache");
            return;
        };
        if let Err(err) = backend.write(path, Some("application/json"), &bytes).await {
            log::warn!("failed to persist remote hash cache to {}: {}", path, err);
        }
    }
}

/// Stat's `path` and returns `(length, last_modified)` without reading the
/// file body — the cheap check that decides whether a re-hash is needed.
pub fn stat(path: impl AsRef<Path>) -> Result<(u64, DateTime<Utc>), VaultError> {
    let meta = std::fs::metadata(path.as_ref()).map_err(VaultError::from)?;
    let modified: DateTime<Utc> = meta.modified().map_err(VaultError::from)?.into();
    Ok((meta.len(), modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::FsBackend;
    use tempfile::TempDir;

    fn entry(n: u8) -> CacheEntry {
        CacheEntry {
            hash: [n; 32],
            length: n as u64,
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn fresh_hash_matches_only_when_stat_is_unchanged() {
        let mut cache = HashCache::new();
        let e = entry(1);
        cache.insert("/a/b.jpg", e);
        assert_eq!(cache.fresh_hash("/a/b.jpg", e.length, e.last_modified), Some(e.hash));
        assert_eq!(cache.fresh_hash("/a/b.jpg", e.length + 1, e.last_modified), None);
        assert_eq!(cache.fresh_hash("/missing", e.length, e.last_modified), None);
    }

    #[test]
    fn save_then_load_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hash-cache.json");
        let mut cache = HashCache::new();
        cache.insert("/a", entry(7));
        cache.save_to_file(&path);

        let loaded = HashCache::load_from_file(&path);
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn loading_missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let loaded = HashCache::load_from_file(dir.path().join("nope.json"));
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_through_backend() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::new(dir.path(), false);
        let mut cache = HashCache::new();
        cache.insert("assets/1", entry(3));
        cache.save_to_backend(&backend, ".db/hash-cache").await;

        let loaded = HashCache::load_from_backend(&backend, ".db/hash-cache").await;
        assert_eq!(loaded.len(), 1);
    }
}
