//! Shared data models for the BatchClip pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Millisecond-resolution time ranges
//! - Timecode parsing (batch text -> ranges)
//! - Segments and operation parameters
//! - Jobs and the job state machine
//! - Progress message schemas

pub mod job;
pub mod progress;
pub mod range;
pub mod segment;
pub mod timecode;

// Re-export common types
pub use job::{Job, JobId, JobState, OwnerId};
pub use progress::ProgressMessage;
pub use range::TimeRange;
pub use segment::{OperationParams, Segment};
pub use timecode::{
    parse_batch, parse_batch_with_delimiters, parse_range, parse_timecode, ParseError, ParsedLine,
};
