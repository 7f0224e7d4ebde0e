//! The pipeline façade.
//!
//! Wires parser, validator, admission, scheduler, and packager together
//! behind two operations: `plan` (parse + validate, for the external
//! confirmation round-trip) and `submit` (admit, run, package, notify).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use batchclip_cache::{fingerprint_file, ContentCache, EntryStore, JsonFileStore};
use batchclip_media::Transcoder;
use batchclip_models::{
    parse_batch, Job, JobId, JobState, OperationParams, OwnerId, ParsedLine, Segment, TimeRange,
};

use crate::admission::AdmissionController;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::executor::SegmentExecutor;
use crate::notify::Notifier;
use crate::packager::{Delivery, OutputPackager};
use crate::scheduler::{JobScheduler, SegmentFailure};
use crate::validate::{apply_padding, EdgePadding, SegmentValidator, ValidationWarning};

/// Parsed and validated batch, ready for the confirmation round-trip.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// Per-entry parse outcomes, in input order
    pub lines: Vec<ParsedLine>,
    /// Validated segments
    pub segments: Vec<Segment>,
    /// Non-fatal observations (overlaps)
    pub warnings: Vec<ValidationWarning>,
    /// Probed source duration
    pub source_duration: Duration,
}

impl BatchPlan {
    /// Number of entries that failed to parse.
    pub fn parse_error_count(&self) -> usize {
        self.lines.iter().filter(|l| l.result.is_err()).count()
    }
}

/// Final report for a terminal job.
#[derive(Debug)]
pub struct JobReport {
    /// The job in its terminal state
    pub job: Job,
    /// Delivery form, absent when nothing succeeded
    pub delivery: Option<Delivery>,
    /// Per-segment failures with reasons
    pub failures: Vec<SegmentFailure>,
    /// Indices never dispatched due to cancellation
    pub skipped: Vec<u32>,
}

/// Handle to a job running in the background.
pub struct RunningJob {
    job_id: JobId,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<JobReport>,
}

impl RunningJob {
    /// The job's ID.
    pub fn id(&self) -> &JobId {
        &self.job_id
    }

    /// Signal cooperative cancellation. In-flight segments finish; no new
    /// segments are dispatched once the flag is observed.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Wait for the job to reach a terminal state.
    ///
    /// Takes `&mut self` so a caller can race it against a cancellation
    /// signal and still cancel-then-wait on the same handle.
    pub async fn wait(&mut self) -> PipelineResult<JobReport> {
        (&mut self.task)
            .await
            .map_err(|e| PipelineError::JobTask(e.to_string()))
    }
}

/// The batch segment processing pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    admission: Arc<AdmissionController>,
    cache: Arc<ContentCache>,
    executor: Arc<SegmentExecutor>,
    transcoder: Arc<dyn Transcoder>,
    notifier: Arc<dyn Notifier>,
    validator: SegmentValidator,
    packager: OutputPackager,
}

impl Pipeline {
    /// Create a pipeline with a JSON-file-backed cache index under the
    /// configured work directory.
    pub async fn new(
        config: PipelineConfig,
        transcoder: Arc<dyn Transcoder>,
        notifier: Arc<dyn Notifier>,
    ) -> PipelineResult<Self> {
        let store = Arc::new(JsonFileStore::new(config.cache_index_path()));
        Self::with_store(config, transcoder, notifier, store).await
    }

    /// Create a pipeline with an explicit cache entry store.
    pub async fn with_store(
        config: PipelineConfig,
        transcoder: Arc<dyn Transcoder>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn EntryStore>,
    ) -> PipelineResult<Self> {
        tokio::fs::create_dir_all(&config.work_dir).await?;
        let cache = Arc::new(ContentCache::open(config.cache_dir(), store).await?);
        let admission = Arc::new(AdmissionController::new(&config));
        let executor = Arc::new(SegmentExecutor::new(
            Arc::clone(&transcoder),
            Arc::clone(&cache),
            &config,
        ));
        let validator = SegmentValidator::new(&config);
        let packager = OutputPackager::new(&config);

        Ok(Self {
            config,
            admission,
            cache,
            executor,
            transcoder,
            notifier,
            validator,
            packager,
        })
    }

    /// Parse and validate batch text against a source file.
    ///
    /// Parse failures are per-entry and do not fail the plan; validation
    /// failures do, with a consolidated report.
    pub async fn plan(
        &self,
        source: &Path,
        text: &str,
        padding: EdgePadding,
    ) -> PipelineResult<BatchPlan> {
        self.plan_with_params(source, text, padding, OperationParams::cut())
            .await
    }

    /// [`plan`](Self::plan) with explicit operation parameters.
    pub async fn plan_with_params(
        &self,
        source: &Path,
        text: &str,
        padding: EdgePadding,
        params: OperationParams,
    ) -> PipelineResult<BatchPlan> {
        let source_size = tokio::fs::metadata(source).await?.len();
        let source_duration = self.transcoder.probe_duration(source).await?;

        let lines: Vec<ParsedLine> = parse_batch(text).collect();
        let ranges: Vec<TimeRange> = lines
            .iter()
            .filter_map(|l| l.result.as_ref().ok().copied())
            .collect();
        let padded = apply_padding(ranges, padding, source_duration);

        let batch = self
            .validator
            .validate(&padded, source, source_size, source_duration, &params)
            .map_err(PipelineError::Validation)?;

        Ok(BatchPlan {
            lines,
            segments: batch.segments,
            warnings: batch.warnings,
            source_duration,
        })
    }

    /// Admit and run a planned batch.
    ///
    /// Admission happens here; a rejection surfaces immediately and no
    /// job is created. On success the job runs in the background and the
    /// returned handle cancels or awaits it.
    pub async fn submit(
        &self,
        owner: OwnerId,
        source: &Path,
        plan: BatchPlan,
    ) -> PipelineResult<RunningJob> {
        self.admission.try_admit(&owner).await?;

        // From here a release is owed; the scheduler pays it on the
        // terminal edge. Fail-before-run paths must pay it themselves.
        let fingerprint = match fingerprint_file(source).await {
            Ok(fp) => fp,
            Err(e) => {
                self.admission.release(&owner).await;
                return Err(e.into());
            }
        };

        let job = Job::new(owner, fingerprint.as_str(), plan.segments).admit();
        let job_id = job.id.clone();
        info!(
            job_id = %job_id,
            owner = %job.owner,
            segments = job.segment_count(),
            "Job admitted"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let scheduler = JobScheduler::new(
            Arc::clone(&self.executor),
            Arc::clone(&self.admission),
            Arc::clone(&self.notifier),
            &self.config,
        );
        let packager = self.packager.clone();
        let notifier = Arc::clone(&self.notifier);
        let dest_dir = self.config.work_dir.join("out").join(job_id.as_str());

        let task = tokio::spawn(async move {
            let completed = scheduler.run(job, cancel_rx).await;

            let delivery = if completed.outputs.is_empty() {
                None
            } else {
                Some(packager.package(&completed, &dest_dir).await)
            };

            // Exactly one terminal notification per job.
            let job_id = completed.job.id.clone();
            let delivered = completed.outputs.len() as u32;
            let failed = completed.job.failed_segments.len() as u32;
            match completed.job.state {
                JobState::Failed => {
                    let first_reason = completed
                        .failures
                        .first()
                        .map(|f| f.reason.clone())
                        .unwrap_or_default();
                    notifier
                        .job_error(
                            &job_id,
                            format!("all {} segments failed: {}", failed, first_reason),
                        )
                        .await;
                }
                state => {
                    let delivery_kind = delivery.as_ref().map(Delivery::kind).unwrap_or("none");
                    notifier
                        .done(&job_id, state.as_str(), delivered, failed, delivery_kind)
                        .await;
                }
            }

            JobReport {
                job: completed.job,
                delivery,
                failures: completed.failures,
                skipped: completed.skipped,
            }
        });

        Ok(RunningJob {
            job_id,
            cancel_tx,
            task,
        })
    }

    /// Run one cache eviction pass.
    pub async fn evict_expired_cache(&self) -> PipelineResult<usize> {
        Ok(self.cache.evict_expired(self.config.cache_max_age).await?)
    }

    /// Spawn the periodic cache eviction task. Eviction runs on an
    /// interval, not on every operation.
    pub fn spawn_eviction_task(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let max_age = self.config.cache_max_age;
        let interval = eviction_interval(max_age);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; evict once at startup.
            loop {
                ticker.tick().await;
                if let Err(e) = cache.evict_expired(max_age).await {
                    warn!(error = %e, "Cache eviction pass failed");
                }
            }
        })
    }

    /// The shared content cache.
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// The admission controller.
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }
}

/// Eviction cadence: hourly, but never slower than the entry lifetime.
fn eviction_interval(max_age: Duration) -> Duration {
    Duration::from_secs(3600).min(max_age).max(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eviction_interval_bounds() {
        assert_eq!(
            eviction_interval(Duration::from_secs(604_800)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            eviction_interval(Duration::from_secs(120)),
            Duration::from_secs(120)
        );
    }
}
