//! Job definitions and the job state machine.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::segment::Segment;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the user who submitted a job. Admission state is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle state.
///
/// `Created -> Admitted -> Running -> {Completed, PartiallyFailed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Segments validated, admission not yet granted
    #[default]
    Created,
    /// Admission granted, not yet dispatching
    Admitted,
    /// Segments are being dispatched
    Running,
    /// Every segment succeeded
    Completed,
    /// Some segments succeeded, some failed
    PartiallyFailed,
    /// Every segment failed
    Failed,
    /// Cancellation observed before all segments were dispatched
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Admitted => "admitted",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::PartiallyFailed => "partially_failed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Terminal states are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::PartiallyFailed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's batch request: one or more segments plus bookkeeping.
///
/// Owned exclusively by the scheduler for its lifetime; only the scheduler
/// mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Submitting user
    pub owner: OwnerId,

    /// Content fingerprint of the source file (hex digest)
    pub source_fingerprint: String,

    /// Ordered segments
    pub segments: Vec<Segment>,

    /// Lifecycle state
    #[serde(default)]
    pub state: JobState,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Number of segments that completed successfully
    #[serde(default)]
    pub completed_count: u32,

    /// Indices of segments that failed after exhausting retries
    #[serde(default)]
    pub failed_segments: BTreeSet<u32>,
}

impl Job {
    /// Create a job in `Created` state.
    pub fn new(owner: OwnerId, source_fingerprint: impl Into<String>, segments: Vec<Segment>) -> Self {
        Self {
            id: JobId::new(),
            owner,
            source_fingerprint: source_fingerprint.into(),
            segments,
            state: JobState::Created,
            created_at: Utc::now(),
            completed_count: 0,
            failed_segments: BTreeSet::new(),
        }
    }

    /// Number of segments in the batch.
    pub fn segment_count(&self) -> u32 {
        self.segments.len() as u32
    }

    /// Mark admission granted.
    pub fn admit(mut self) -> Self {
        self.state = JobState::Admitted;
        self
    }

    /// Begin dispatching segments.
    pub fn start(mut self) -> Self {
        self.state = JobState::Running;
        self
    }

    /// Record one successful segment completion.
    pub fn record_completion(&mut self) {
        self.completed_count += 1;
    }

    /// Record one segment failure.
    pub fn record_failure(&mut self, index: u32) {
        self.failed_segments.insert(index);
    }

    /// Transition to the terminal state implied by the recorded outcomes.
    ///
    /// `Cancelled` wins when the cancellation flag was observed before all
    /// segments were dispatched; otherwise classification is by failure
    /// count alone.
    pub fn finish(mut self, cancelled: bool) -> Self {
        self.state = if cancelled {
            JobState::Cancelled
        } else if self.failed_segments.is_empty() {
            JobState::Completed
        } else if self.completed_count == 0 {
            JobState::Failed
        } else {
            JobState::PartiallyFailed
        };
        self
    }
}
