//! Structured job logging utilities.

use tracing::{error, info, warn, Span};

use batchclip_models::{JobId, OwnerId};

/// Job logger with consistent contextual fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    owner: String,
}

impl JobLogger {
    /// Create a logger for one job.
    pub fn new(job_id: &JobId, owner: &OwnerId) -> Self {
        Self {
            job_id: job_id.to_string(),
            owner: owner.to_string(),
        }
    }

    /// Log the start of job processing.
    pub fn started(&self, total_segments: u32) {
        info!(
            job_id = %self.job_id,
            owner = %self.owner,
            total_segments,
            "Job started"
        );
    }

    /// Log one settled segment.
    pub fn segment_settled(&self, index: u32, ok: bool, from_cache: bool) {
        info!(
            job_id = %self.job_id,
            owner = %self.owner,
            index,
            ok,
            from_cache,
            "Segment settled"
        );
    }

    /// Log a warning during job execution.
    pub fn warning(&self, message: &str) {
        warn!(job_id = %self.job_id, owner = %self.owner, "{}", message);
    }

    /// Log an error during job execution.
    pub fn failure(&self, message: &str) {
        error!(job_id = %self.job_id, owner = %self.owner, "{}", message);
    }

    /// Log the terminal state.
    pub fn finished(&self, state: &str, completed: u32, failed: u32) {
        info!(
            job_id = %self.job_id,
            owner = %self.owner,
            state,
            completed,
            failed,
            "Job finished"
        );
    }

    /// Create a tracing span carrying the job fields.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, owner = %self.owner)
    }
}
