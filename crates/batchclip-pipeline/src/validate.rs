//! Segment validation.
//!
//! Runs after parsing and before admission. Every offending range is
//! collected into one report so the caller can present a single
//! consolidated confirmation instead of failing at the first problem.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use batchclip_models::{OperationParams, Segment, TimeRange};

use crate::config::PipelineConfig;

/// Extra time carried on both ends of each range so speech is not cut
/// mid-word. Applied before validation, clamped to the source bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgePadding {
    /// Padding before the start, in milliseconds
    pub start_ms: u64,
    /// Padding after the end, in milliseconds
    pub end_ms: u64,
}

impl EdgePadding {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn is_zero(&self) -> bool {
        self.start_ms == 0 && self.end_ms == 0
    }
}

/// Apply edge padding to ranges, clamping to `[0, source_duration]`.
///
/// A range that inverts under clamping (possible only for degenerate
/// inputs at the very edge of the file) is dropped.
pub fn apply_padding(
    ranges: impl IntoIterator<Item = TimeRange>,
    padding: EdgePadding,
    source_duration: Duration,
) -> Vec<TimeRange> {
    let duration_ms = source_duration.as_millis() as u64;

    ranges
        .into_iter()
        .filter_map(|range| {
            let start = range.start_ms.saturating_sub(padding.start_ms);
            let end = (range.end_ms + padding.end_ms).min(duration_ms.max(range.end_ms));
            TimeRange::new(start, end)
        })
        .collect()
}

/// One validation failure. Indices are 1-based batch positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationIssue {
    /// Batch holds more segments than the configured ceiling.
    TooManySegments { count: usize, limit: usize },

    /// A range ends past the source duration.
    RangeOutOfBounds {
        index: u32,
        end_ms: u64,
        duration_ms: u64,
    },

    /// The source file exceeds the size ceiling.
    SourceTooLarge { size_bytes: u64, limit_bytes: u64 },

    /// No valid ranges were left to process.
    EmptyBatch,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManySegments { count, limit } => {
                write!(f, "too many segments: {} (limit {})", count, limit)
            }
            Self::RangeOutOfBounds {
                index,
                end_ms,
                duration_ms,
            } => write!(
                f,
                "segment {} ends at {}ms, past source duration {}ms",
                index, end_ms, duration_ms
            ),
            Self::SourceTooLarge {
                size_bytes,
                limit_bytes,
            } => write!(
                f,
                "source file is {} bytes (limit {})",
                size_bytes, limit_bytes
            ),
            Self::EmptyBatch => write!(f, "no valid ranges to process"),
        }
    }
}

/// Non-fatal observation. Overlapping clips are permitted — users cut
/// overlapping highlights on purpose — but worth surfacing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationWarning {
    /// Two ranges share time. Indices are 1-based batch positions.
    Overlap { first: u32, second: u32 },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap { first, second } => {
                write!(f, "segments {} and {} overlap", first, second)
            }
        }
    }
}

/// Consolidated validation failure listing every offender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for issue in &self.issues {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}", issue)?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

/// Validated batch ready for admission.
#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    pub segments: Vec<Segment>,
    pub warnings: Vec<ValidationWarning>,
}

/// Checks parsed ranges against the source and batch limits.
#[derive(Debug, Clone)]
pub struct SegmentValidator {
    max_segments: usize,
    max_file_size_bytes: u64,
}

impl SegmentValidator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_segments: config.max_segments,
            max_file_size_bytes: config.max_file_size_bytes,
        }
    }

    /// Validate ranges against the source.
    ///
    /// Checks run in order (count, size, bounds) but never stop early;
    /// the returned report lists every offending index.
    pub fn validate(
        &self,
        ranges: &[TimeRange],
        source: &Path,
        source_size_bytes: u64,
        source_duration: Duration,
        params: &OperationParams,
    ) -> Result<ValidatedBatch, ValidationReport> {
        let mut issues = Vec::new();
        let duration_ms = source_duration.as_millis() as u64;

        if ranges.is_empty() {
            issues.push(ValidationIssue::EmptyBatch);
        }

        if ranges.len() > self.max_segments {
            issues.push(ValidationIssue::TooManySegments {
                count: ranges.len(),
                limit: self.max_segments,
            });
        }

        if source_size_bytes > self.max_file_size_bytes {
            issues.push(ValidationIssue::SourceTooLarge {
                size_bytes: source_size_bytes,
                limit_bytes: self.max_file_size_bytes,
            });
        }

        for (i, range) in ranges.iter().enumerate() {
            if range.end_ms > duration_ms {
                issues.push(ValidationIssue::RangeOutOfBounds {
                    index: i as u32 + 1,
                    end_ms: range.end_ms,
                    duration_ms,
                });
            }
        }

        if !issues.is_empty() {
            return Err(ValidationReport { issues });
        }

        let warnings = overlap_warnings(ranges);
        let segments = ranges
            .iter()
            .enumerate()
            .map(|(i, range)| Segment::new(i as u32 + 1, *range, source, params.clone()))
            .collect();

        Ok(ValidatedBatch { segments, warnings })
    }
}

/// Report every overlapping pair, in batch order.
fn overlap_warnings(ranges: &[TimeRange]) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    for i in 0..ranges.len() {
        for j in (i + 1)..ranges.len() {
            if ranges[i].overlaps(&ranges[j]) {
                warnings.push(ValidationWarning::Overlap {
                    first: i as u32 + 1,
                    second: j as u32 + 1,
                });
            }
        }
    }
    warnings
}
