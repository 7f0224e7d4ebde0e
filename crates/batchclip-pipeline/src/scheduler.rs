//! Job scheduler.
//!
//! Owns the job state machine and drives segments through the executor
//! under bounded concurrency. Failures never abort sibling segments; a
//! batch must not abandon ninety finished clips because clip ninety-one
//! failed. Cancellation is cooperative: the flag is checked before each
//! dispatch and in-flight executions finish.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinSet;

use batchclip_cache::Fingerprint;
use batchclip_models::{Job, OwnerId};

use crate::admission::AdmissionController;
use crate::config::PipelineConfig;
use crate::error::ExecutionError;
use crate::executor::{SegmentExecutor, SegmentOutput};
use crate::logging::JobLogger;
use crate::notify::Notifier;

/// One segment that failed after exhausting retries.
#[derive(Debug, Clone)]
pub struct SegmentFailure {
    /// 1-based batch position
    pub index: u32,
    /// Human-readable failure reason
    pub reason: String,
}

/// A job that reached a terminal state.
#[derive(Debug)]
pub struct CompletedJob {
    /// The job, in its terminal state
    pub job: Job,
    /// Successful outputs, sorted by segment index
    pub outputs: Vec<SegmentOutput>,
    /// Failures, sorted by segment index
    pub failures: Vec<SegmentFailure>,
    /// Indices never dispatched because cancellation was observed first
    pub skipped: Vec<u32>,
}

/// Drives one job's segments through the executor.
pub struct JobScheduler {
    executor: Arc<SegmentExecutor>,
    admission: Arc<AdmissionController>,
    notifier: Arc<dyn Notifier>,
    concurrency: usize,
}

impl JobScheduler {
    pub fn new(
        executor: Arc<SegmentExecutor>,
        admission: Arc<AdmissionController>,
        notifier: Arc<dyn Notifier>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            executor,
            admission,
            notifier,
            concurrency: config.executor_concurrency,
        }
    }

    /// Run an admitted job to a terminal state.
    ///
    /// Consumes the job: only the scheduler mutates it, and the returned
    /// terminal state is immutable. The paired admission `release` happens
    /// exactly once, on the terminal edge, regardless of outcome.
    pub async fn run(&self, job: Job, cancel_rx: watch::Receiver<bool>) -> CompletedJob {
        let logger = JobLogger::new(&job.id, &job.owner);
        let owner = job.owner.clone();
        let total = job.segment_count();
        let fingerprint = Fingerprint::from_hex(job.source_fingerprint.clone());

        let mut job = job.start();
        logger.started(total);

        let limit = self.concurrency.min(job.segments.len()).max(1);
        let mut pending = job.segments.clone().into_iter();
        let mut tasks: JoinSet<(u32, Result<SegmentOutput, ExecutionError>)> = JoinSet::new();
        let mut inflight: HashMap<tokio::task::Id, u32> = HashMap::new();

        let mut outputs: Vec<SegmentOutput> = Vec::new();
        let mut failures: Vec<SegmentFailure> = Vec::new();
        let mut cancelled = false;

        loop {
            // Refill the window. The cancellation flag is checked before
            // every dispatch; once observed, nothing new starts.
            while tasks.len() < limit {
                if *cancel_rx.borrow() {
                    cancelled = true;
                }
                if cancelled {
                    break;
                }
                let Some(segment) = pending.next() else { break };

                let executor = Arc::clone(&self.executor);
                let notifier = Arc::clone(&self.notifier);
                let fingerprint = fingerprint.clone();
                let job_id = job.id.clone();
                let index = segment.index;

                let handle = tasks.spawn(async move {
                    notifier.segment_started(&job_id, index).await;
                    let result = executor.execute(&fingerprint, &segment).await;
                    (index, result)
                });
                inflight.insert(handle.id(), index);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            match joined {
                Ok((task_id, (index, result))) => {
                    inflight.remove(&task_id);
                    match result {
                        Ok(output) => {
                            job.record_completion();
                            logger.segment_settled(index, true, output.from_cache);
                            self.notifier
                                .segment_finished(&job.id, index, true, output.from_cache)
                                .await;
                            outputs.push(output);
                        }
                        Err(error) => {
                            job.record_failure(index);
                            logger.segment_settled(index, false, false);
                            self.notifier
                                .segment_finished(&job.id, index, false, false)
                                .await;
                            failures.push(SegmentFailure {
                                index,
                                reason: error.to_string(),
                            });
                        }
                    }
                    self.notifier
                        .progress(&job.id, job.completed_count, total)
                        .await;
                }
                Err(join_error) => {
                    // An executor task died; record the segment as failed
                    // rather than wedging the job.
                    let index = inflight.remove(&join_error.id()).unwrap_or(0);
                    job.record_failure(index);
                    logger.failure(&format!("segment {} task aborted: {}", index, join_error));
                    failures.push(SegmentFailure {
                        index,
                        reason: format!("task aborted: {}", join_error),
                    });
                }
            }
        }

        // Anything still pending was never dispatched.
        let skipped: Vec<u32> = pending.map(|s| s.index).collect();

        outputs.sort_by_key(|o| o.index);
        failures.sort_by_key(|f| f.index);

        let job = job.finish(cancelled);
        logger.finished(
            job.state.as_str(),
            job.completed_count,
            job.failed_segments.len() as u32,
        );
        counter!("batchclip_jobs_total", "state" => job.state.as_str()).increment(1);

        // Exactly-once release, on the terminal edge.
        self.release(&owner).await;

        CompletedJob {
            job,
            outputs,
            failures,
            skipped,
        }
    }

    async fn release(&self, owner: &OwnerId) {
        self.admission.release(owner).await;
    }
}
