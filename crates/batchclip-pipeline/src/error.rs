//! Pipeline error types.

use thiserror::Error;

use crate::validate::ValidationReport;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Top-level pipeline error.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(ValidationReport),

    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionRejected),

    #[error("Media error: {0}")]
    Media(#[from] batchclip_media::MediaError),

    #[error("Cache error: {0}")]
    Cache(#[from] batchclip_cache::CacheError),

    #[error("Job task failed: {0}")]
    JobTask(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a submission was turned away. Surfaced immediately; the job is
/// never created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionRejected {
    #[error("rate limited: more than {max_requests} requests in the current window")]
    RateLimited { max_requests: u32 },

    #[error("too many active jobs: {active} of {limit} already running")]
    TooManyActiveJobs { active: u32, limit: u32 },
}

/// Per-segment execution failure, recorded after retries are exhausted.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("transcode failed after {attempts} attempts: {message}")]
    Transcode { message: String, attempts: u32 },

    #[error("segment timed out after {limit_secs}s ({attempts} attempts)")]
    Timeout { limit_secs: u64, attempts: u32 },

    #[error("cache store failed: {0}")]
    Cache(#[from] batchclip_cache::CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    /// Whether this failure came from the per-segment deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }
}

/// Archive assembly failure. Packaging degrades to individual files
/// instead of failing the job.
#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("archive build failed: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
