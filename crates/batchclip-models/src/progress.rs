//! Progress message schema.
//!
//! The serialized form a notification transport would carry. The pipeline
//! emits these through its notifier trait; the transport decides how to
//! render them.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Message envelope for job progress notifications.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    /// Count of settled segments. Counts, not positions: segment
    /// completion order is not the input order.
    Progress { completed: u32, total: u32 },

    /// A segment was handed to the executor.
    SegmentStarted { index: u32 },

    /// A segment settled.
    SegmentFinished {
        index: u32,
        ok: bool,
        from_cache: bool,
    },

    /// Job reached a terminal state.
    Done {
        state: String,
        delivered: u32,
        failed: u32,
        /// Delivery form: `single`, `files`, `archive`, or `none`
        delivery: String,
    },

    /// Job-level error.
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressMessage {
    /// Create a progress count message.
    pub fn progress(completed: u32, total: u32) -> Self {
        ProgressMessage::Progress { completed, total }
    }

    /// Create a segment-started message.
    pub fn segment_started(index: u32) -> Self {
        ProgressMessage::SegmentStarted { index }
    }

    /// Create a segment-finished message.
    pub fn segment_finished(index: u32, ok: bool, from_cache: bool) -> Self {
        ProgressMessage::SegmentFinished {
            index,
            ok,
            from_cache,
        }
    }

    /// Create a terminal summary message.
    pub fn done(
        state: impl Into<String>,
        delivered: u32,
        failed: u32,
        delivery: impl Into<String>,
    ) -> Self {
        ProgressMessage::Done {
            state: state.into(),
            delivered,
            failed,
            delivery: delivery.into(),
        }
    }

    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ProgressMessage::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_tags() {
        let msg = ProgressMessage::progress(2, 10);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"completed\":2"));

        let msg = ProgressMessage::segment_finished(3, true, false);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"segment_finished\""));
        assert!(json.contains("\"from_cache\":false"));
    }

    #[test]
    fn test_done_round_trip() {
        let msg = ProgressMessage::done("completed", 5, 0, "archive");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ProgressMessage = serde_json::from_str(&json).unwrap();
        match back {
            ProgressMessage::Done {
                state,
                delivered,
                failed,
                delivery,
            } => {
                assert_eq!(state, "completed");
                assert_eq!(delivered, 5);
                assert_eq!(failed, 0);
                assert_eq!(delivery, "archive");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
