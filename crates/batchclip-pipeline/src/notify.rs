//! The notifier seam.
//!
//! The scheduler reports progress through this trait at defined points
//! (segment start/finish, job terminal); the transport that renders the
//! messages — chat edits, websockets, a terminal — lives outside the core.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info};

use batchclip_models::{JobId, ProgressMessage};

/// Progress observer invoked by the scheduler.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message for a job. Delivery is best-effort; the
    /// pipeline never fails a job because a notification was dropped.
    async fn send(&self, job_id: &JobId, message: ProgressMessage);

    /// Report settled-segment counts.
    async fn progress(&self, job_id: &JobId, completed: u32, total: u32) {
        self.send(job_id, ProgressMessage::progress(completed, total))
            .await;
    }

    /// Report a segment entering the executor.
    async fn segment_started(&self, job_id: &JobId, index: u32) {
        self.send(job_id, ProgressMessage::segment_started(index))
            .await;
    }

    /// Report a settled segment.
    async fn segment_finished(&self, job_id: &JobId, index: u32, ok: bool, from_cache: bool) {
        self.send(job_id, ProgressMessage::segment_finished(index, ok, from_cache))
            .await;
    }

    /// Report the terminal summary.
    async fn done(&self, job_id: &JobId, state: &str, delivered: u32, failed: u32, delivery: &str) {
        self.send(
            job_id,
            ProgressMessage::done(state, delivered, failed, delivery),
        )
        .await;
    }

    /// Report a job-level error.
    async fn job_error(&self, job_id: &JobId, message: String) {
        self.send(job_id, ProgressMessage::error(message)).await;
    }
}

/// Notifier that logs through `tracing`. The default for the binary.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, job_id: &JobId, message: ProgressMessage) {
        match &message {
            ProgressMessage::Error { message, .. } => {
                error!(job_id = %job_id, "{}", message);
            }
            other => {
                info!(job_id = %job_id, message = ?other, "Job notification");
            }
        }
    }
}

/// Notifier that forwards messages into an unbounded channel. Used by
/// transports that multiplex jobs, and by tests to assert ordering.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<(JobId, ProgressMessage)>,
}

impl ChannelNotifier {
    /// Create the notifier plus the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(JobId, ProgressMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, job_id: &JobId, message: ProgressMessage) {
        // Receiver gone means the transport went away; drop silently.
        let _ = self.tx.send((job_id.clone(), message));
    }
}
