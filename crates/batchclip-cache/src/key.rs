//! Source fingerprints and cache keys.
//!
//! A fingerprint identifies source content; a cache key identifies one
//! produced output: the digest of (fingerprint, operation, normalized
//! parameters, range).

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use batchclip_models::{OperationParams, Segment, TimeRange};

use crate::error::CacheResult;

/// How much of the source file the fingerprint reads. Hashing the head
/// plus the length is a stable, cheap identity for large uploads.
const FINGERPRINT_HEAD_BYTES: usize = 1024 * 1024;

/// Stable content-derived identifier for a source file (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a source file: SHA-256 over its length and first 1 MiB.
pub async fn fingerprint_file(path: impl AsRef<Path>) -> CacheResult<Fingerprint> {
    let path = path.as_ref();
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();

    let mut hasher = Sha256::new();
    hasher.update(len.to_le_bytes());

    let mut buf = vec![0u8; 64 * 1024];
    let mut remaining = FINGERPRINT_HEAD_BYTES;
    while remaining > 0 {
        let want = remaining.min(buf.len());
        let read = file.read(&mut buf[..want]).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        remaining -= read;
    }

    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}

/// Deterministic digest of (fingerprint, operation, params, range).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Compute the key for one unit of work.
    pub fn compute(fingerprint: &Fingerprint, params: &OperationParams, range: TimeRange) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(params.canonical_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(range.start_ms.to_le_bytes());
        hasher.update(range.end_ms.to_le_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Compute the key for a segment.
    pub fn for_segment(fingerprint: &Fingerprint, segment: &Segment) -> Self {
        Self::compute(fingerprint, &segment.params, segment.range)
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

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> Fingerprint {
        Fingerprint::from_hex("aa".repeat(32))
    }

    #[test]
    fn test_key_is_deterministic() {
        let range = TimeRange::new(0, 10_000).unwrap();
        let a = CacheKey::compute(&fp(), &OperationParams::cut(), range);
        let b = CacheKey::compute(&fp(), &OperationParams::cut(), range);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_key_varies_with_inputs() {
        let range = TimeRange::new(0, 10_000).unwrap();
        let base = CacheKey::compute(&fp(), &OperationParams::cut(), range);

        let other_range = TimeRange::new(0, 20_000).unwrap();
        assert_ne!(
            base,
            CacheKey::compute(&fp(), &OperationParams::cut(), other_range)
        );

        let other_params = OperationParams::cut().with_param("crf", "20");
        assert_ne!(base, CacheKey::compute(&fp(), &other_params, range));

        let other_fp = Fingerprint::from_hex("bb".repeat(32));
        assert_ne!(
            base,
            CacheKey::compute(&other_fp, &OperationParams::cut(), range)
        );
    }

    #[test]
    fn test_key_ignores_param_insertion_order() {
        let range = TimeRange::new(0, 1_000).unwrap();
        let a = OperationParams::cut()
            .with_param("crf", "23")
            .with_param("preset", "fast");
        let b = OperationParams::cut()
            .with_param("preset", "fast")
            .with_param("crf", "23");
        assert_eq!(
            CacheKey::compute(&fp(), &a, range),
            CacheKey::compute(&fp(), &b, range)
        );
    }

    #[tokio::test]
    async fn test_fingerprint_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path_a = dir.path().join("a.bin");
        let path_b = dir.path().join("b.bin");

        tokio::fs::write(&path_a, b"same content").await.unwrap();
        tokio::fs::write(&path_b, b"same content").await.unwrap();
        assert_eq!(
            fingerprint_file(&path_a).await.unwrap(),
            fingerprint_file(&path_b).await.unwrap()
        );

        tokio::fs::write(&path_b, b"other content").await.unwrap();
        assert_ne!(
            fingerprint_file(&path_a).await.unwrap(),
            fingerprint_file(&path_b).await.unwrap()
        );
    }
}
