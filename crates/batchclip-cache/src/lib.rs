//! Content-addressed result cache.
//!
//! This crate provides:
//! - Source fingerprints and cache keys (SHA-256)
//! - A filesystem-backed cache of produced outputs
//! - A pluggable durable index (`EntryStore`) so entries survive restart
//! - Age-based eviction that releases backing storage

pub mod cache;
pub mod entry;
pub mod error;
pub mod key;
pub mod store;

pub use cache::ContentCache;
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use key::{fingerprint_file, CacheKey, Fingerprint};
pub use store::{EntryStore, JsonFileStore, MemoryStore};
