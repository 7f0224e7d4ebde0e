//! The content-addressed cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::store::EntryStore;

/// Content-addressed store of produced outputs.
///
/// Output files live under one cache directory, named by key; the index is
/// held in memory behind an `RwLock` and snapshotted through the
/// `EntryStore` on every mutation. Concurrent lookups and stores to
/// distinct keys are safe; concurrent stores to the same key resolve
/// last-writer-wins (the payload is idempotent to overwrite).
pub struct ContentCache {
    dir: PathBuf,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    store: Arc<dyn EntryStore>,
}

impl ContentCache {
    /// Open the cache, loading the persisted index.
    ///
    /// Entries whose backing file has disappeared are dropped rather than
    /// served as dangling hits.
    pub async fn open(dir: impl Into<PathBuf>, store: Arc<dyn EntryStore>) -> CacheResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let loaded = store.load().await?;
        let mut entries = HashMap::with_capacity(loaded.len());
        let mut dropped = 0usize;
        for entry in loaded {
            if entry.output_location.exists() {
                entries.insert(entry.key.clone(), entry);
            } else {
                dropped += 1;
            }
        }

        if dropped > 0 {
            warn!(dropped, "Dropped cache entries with missing backing files");
        }
        info!(
            dir = %dir.display(),
            entries = entries.len(),
            "Opened content cache"
        );

        Ok(Self {
            dir,
            entries: RwLock::new(entries),
            store,
        })
    }

    /// Look up a cached output.
    ///
    /// A hit bumps `last_accessed_at`/`access_count` in memory; the
    /// telemetry is best-effort and only reaches the durable index on the
    /// next snapshot.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.touch();
                counter!("batchclip_cache_hits_total").increment(1);
                debug!(key = %key, "Cache hit");
                Some(entry.clone())
            }
            None => {
                counter!("batchclip_cache_misses_total").increment(1);
                None
            }
        }
    }

    /// Store a produced output under `key`, taking ownership of the file.
    ///
    /// The file is moved into the cache directory; an existing entry for
    /// the same key is overwritten (last-writer-wins). Callers only store
    /// after a genuine miss; a racing duplicate store is harmless.
    pub async fn store(
        &self,
        key: CacheKey,
        produced: &Path,
        size_bytes: u64,
    ) -> CacheResult<CacheEntry> {
        let ext = produced
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let dest = self.dir.join(format!("{}.{}", key, ext));

        move_into_cache(produced, &dest).await?;

        let entry = CacheEntry::new(key.clone(), &dest, size_bytes);
        let snapshot = {
            let mut entries = self.entries.write().await;
            if let Some(previous) = entries.insert(key.clone(), entry.clone()) {
                // Same key hashes to the same destination unless the
                // extension changed; drop a stale file if it did.
                if previous.output_location != dest {
                    let _ = tokio::fs::remove_file(&previous.output_location).await;
                }
            }
            entries.values().cloned().collect::<Vec<_>>()
        };

        self.store.persist(&snapshot).await?;
        debug!(key = %key, dest = %dest.display(), "Stored cache entry");
        Ok(entry)
    }

    /// Evict entries created before `cutoff`, releasing their files.
    ///
    /// Returns the number of evicted entries.
    pub async fn evict_older_than(&self, cutoff: DateTime<Utc>) -> CacheResult<usize> {
        let (expired, snapshot) = {
            let mut entries = self.entries.write().await;
            let expired: Vec<CacheEntry> = entries
                .values()
                .filter(|e| e.is_older_than(cutoff))
                .cloned()
                .collect();
            for entry in &expired {
                entries.remove(&entry.key);
            }
            (expired, entries.values().cloned().collect::<Vec<_>>())
        };

        for entry in &expired {
            if let Err(e) = tokio::fs::remove_file(&entry.output_location).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        path = %entry.output_location.display(),
                        error = %e,
                        "Failed to remove evicted cache file"
                    );
                }
            }
        }

        if !expired.is_empty() {
            self.store.persist(&snapshot).await?;
            counter!("batchclip_cache_evictions_total").increment(expired.len() as u64);
            info!(evicted = expired.len(), "Evicted expired cache entries");
        }

        Ok(expired.len())
    }

    /// Evict entries older than `max_age`. Invoked periodically, not on
    /// every operation; eviction is pure age-based, not LRU.
    pub async fn evict_expired(&self, max_age: Duration) -> CacheResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        self.evict_older_than(cutoff).await
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Move a produced file into the cache directory. Falls back to
/// copy+delete when the work dir is on another filesystem.
async fn move_into_cache(src: &Path, dest: &Path) -> CacheResult<()> {
    match tokio::fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(18) => {
            tokio::fs::copy(src, dest).await?;
            let _ = tokio::fs::remove_file(src).await;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
