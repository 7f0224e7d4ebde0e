//! Millisecond-resolution time ranges.

use std::fmt;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::timecode::format_timecode;

/// A time range inside a media file, at millisecond resolution.
///
/// Invariant: `end_ms > start_ms`. Construct through [`TimeRange::new`],
/// which enforces it; once built a range is immutable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct TimeRange {
    /// Start offset in milliseconds.
    pub start_ms: u64,
    /// End offset in milliseconds.
    pub end_ms: u64,
}

impl TimeRange {
    /// Create a range. Returns `None` unless `end_ms > start_ms`.
    pub fn new(start_ms: u64, end_ms: u64) -> Option<Self> {
        if end_ms > start_ms {
            Some(Self { start_ms, end_ms })
        } else {
            None
        }
    }

    /// Range length.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.end_ms - self.start_ms)
    }

    /// Range length in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    /// Start offset in seconds, for FFmpeg argument formatting.
    pub fn start_secs(&self) -> f64 {
        self.start_ms as f64 / 1000.0
    }

    /// Range length in seconds, for FFmpeg argument formatting.
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms() as f64 / 1000.0
    }

    /// Whether two ranges share any instant.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_ms < other.end_ms && other.start_ms < self.end_ms
    }

    /// Filesystem-safe label (`:` replaced by `.`), used in archive entry names.
    pub fn slug(&self) -> String {
        format!(
            "{}-{}",
            format_timecode(self.start_ms).replace(':', "."),
            format_timecode(self.end_ms).replace(':', ".")
        )
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            format_timecode(self.start_ms),
            format_timecode(self.end_ms)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_inverted_and_empty() {
        assert!(TimeRange::new(1_000, 2_000).is_some());
        assert!(TimeRange::new(2_000, 2_000).is_none());
        assert!(TimeRange::new(2_000, 1_000).is_none());
    }

    #[test]
    fn test_duration() {
        let range = TimeRange::new(500, 2_750).unwrap();
        assert_eq!(range.duration_ms(), 2_250);
        assert_eq!(range.duration(), Duration::from_millis(2_250));
        assert!((range.duration_secs() - 2.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overlaps() {
        let a = TimeRange::new(0, 10_000).unwrap();
        let b = TimeRange::new(5_000, 15_000).unwrap();
        let c = TimeRange::new(10_000, 20_000).unwrap();

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        // Touching endpoints do not overlap
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_display_and_slug() {
        let range = TimeRange::new(0, 119_000).unwrap();
        assert_eq!(range.to_string(), "00:00:00-00:01:59");
        assert_eq!(range.slug(), "00.00.00-00.01.59");
    }
}
