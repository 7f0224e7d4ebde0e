//! Durable persistence for the cache index.
//!
//! The cache holds its index in memory and snapshots it through an
//! `EntryStore` so entries survive restart. In-flight jobs are not
//! recovered; a restart is a cold start for everything except the cache.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};

/// Key-value persistence capability for cache entry records.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Load all persisted entries.
    async fn load(&self) -> CacheResult<Vec<CacheEntry>>;

    /// Persist the full set of entries, replacing the previous snapshot.
    async fn persist(&self, entries: &[CacheEntry]) -> CacheResult<()>;
}

/// JSON-file-backed entry store.
///
/// Writes to a sibling temp file and renames over the index so a crash
/// mid-write cannot truncate the previous snapshot.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EntryStore for JsonFileStore {
    async fn load(&self) -> CacheResult<Vec<CacheEntry>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let entries: Vec<CacheEntry> = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::load_failed(format!("corrupt index: {}", e)))?;
                debug!(
                    path = %self.path.display(),
                    entries = entries.len(),
                    "Loaded cache index"
                );
                Ok(entries)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CacheError::from(e)),
        }
    }

    async fn persist(&self, entries: &[CacheEntry]) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.part");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| CacheError::persist_failed(e.to_string()))?;

        Ok(())
    }
}

/// In-memory entry store for tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn load(&self) -> CacheResult<Vec<CacheEntry>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn persist(&self, entries: &[CacheEntry]) -> CacheResult<()> {
        *self.entries.lock().await = entries.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{CacheKey, Fingerprint};
    use batchclip_models::{OperationParams, TimeRange};

    fn entry(start_ms: u64) -> CacheEntry {
        let key = CacheKey::compute(
            &Fingerprint::from_hex("cd".repeat(32)),
            &OperationParams::cut(),
            TimeRange::new(start_ms, start_ms + 1_000).unwrap(),
        );
        CacheEntry::new(key, format!("/cache/{}.mp4", start_ms), 128)
    }

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("index.json"));

        assert!(store.load().await.unwrap().is_empty());

        let entries = vec![entry(0), entry(5_000)];
        store.persist(&entries).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].key, entries[0].key);
    }

    #[tokio::test]
    async fn test_json_store_corrupt_index_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(CacheError::LoadFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        store.persist(&[entry(0)]).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 1);
    }
}
