//! Cache entry records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// One cached output.
///
/// `output_location` stays valid for reads until eviction; eviction is the
/// only destructor. Entries are append-only on creation and mutated only
/// to bump access telemetry on hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content-addressed key
    pub key: CacheKey,

    /// Cached output file
    pub output_location: PathBuf,

    /// Output size in bytes
    pub size_bytes: u64,

    /// When the entry was created (eviction orders by this)
    pub created_at: DateTime<Utc>,

    /// Last hit time (telemetry only, not used for eviction)
    pub last_accessed_at: DateTime<Utc>,

    /// Hit count (telemetry only)
    pub access_count: u64,
}

impl CacheEntry {
    /// Create a fresh entry.
    pub fn new(key: CacheKey, output_location: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            key,
            output_location: output_location.into(),
            size_bytes,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    /// Record a hit.
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }

    /// Whether the entry is older than `cutoff`.
    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key() -> CacheKey {
        use batchclip_models::{OperationParams, TimeRange};
        use crate::key::Fingerprint;
        CacheKey::compute(
            &Fingerprint::from_hex("ab".repeat(32)),
            &OperationParams::cut(),
            TimeRange::new(0, 1_000).unwrap(),
        )
    }

    #[test]
    fn test_touch_bumps_telemetry() {
        let mut entry = CacheEntry::new(key(), "/cache/out.mp4", 42);
        assert_eq!(entry.access_count, 0);

        let before = entry.last_accessed_at;
        entry.touch();
        assert_eq!(entry.access_count, 1);
        assert!(entry.last_accessed_at >= before);
    }

    #[test]
    fn test_age_check() {
        let entry = CacheEntry::new(key(), "/cache/out.mp4", 42);
        assert!(entry.is_older_than(Utc::now() + Duration::seconds(60)));
        assert!(!entry.is_older_than(Utc::now() - Duration::seconds(60)));
    }
}
