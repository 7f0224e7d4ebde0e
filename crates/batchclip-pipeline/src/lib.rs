//! Batch segment processing pipeline.
//!
//! This crate provides:
//! - Admission control (per-owner rate and concurrency limits)
//! - Segment validation against source duration and batch limits
//! - A segment executor with cache reuse and bounded retry
//! - The job scheduler (state machine, bounded concurrency, cancellation)
//! - Output packaging (individual files or a single archive)
//! - The notifier seam toward whatever transport delivers progress

pub mod admission;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod notify;
pub mod packager;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod validate;

pub use admission::{AdmissionController, OwnerLimits};
pub use config::PipelineConfig;
pub use error::{AdmissionRejected, ExecutionError, PackagingError, PipelineError, PipelineResult};
pub use retry::{retry_async, RetryConfig};
pub use executor::{SegmentExecutor, SegmentOutput};
pub use logging::JobLogger;
pub use notify::{ChannelNotifier, Notifier, TracingNotifier};
pub use packager::{Delivery, Manifest, OutputPackager};
pub use pipeline::{BatchPlan, JobReport, Pipeline, RunningJob};
pub use scheduler::{CompletedJob, JobScheduler, SegmentFailure};
pub use validate::{
    apply_padding, EdgePadding, SegmentValidator, ValidatedBatch, ValidationIssue,
    ValidationReport, ValidationWarning,
};
