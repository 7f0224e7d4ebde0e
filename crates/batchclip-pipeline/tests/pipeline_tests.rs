//! End-to-end pipeline tests with a fake transcoder.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

use batchclip_cache::MemoryStore;
use batchclip_media::{MediaError, MediaResult, Transcoder};
use batchclip_models::{
    JobId, JobState, OperationParams, OwnerId, ParseError, ProgressMessage, TimeRange,
};
use batchclip_pipeline::{
    AdmissionRejected, ChannelNotifier, Delivery, EdgePadding, Pipeline, PipelineConfig,
    PipelineError, ValidationIssue,
};

/// Transcoder fake: writes a small file per run, can fail chosen ranges,
/// and can gate runs behind a semaphore for cancellation tests.
struct FakeTranscoder {
    calls: AtomicU32,
    fail_starts: HashSet<u64>,
    gate: Option<Arc<Semaphore>>,
    duration: Duration,
}

impl FakeTranscoder {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_starts: HashSet::new(),
            gate: None,
            duration: Duration::from_secs(600),
        }
    }

    fn failing_starts(mut self, starts_ms: impl IntoIterator<Item = u64>) -> Self {
        self.fail_starts = starts_ms.into_iter().collect();
        self
    }

    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn run(
        &self,
        _input: &Path,
        range: TimeRange,
        _params: &OperationParams,
        output: &Path,
    ) -> MediaResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| MediaError::ffmpeg_failed("gate closed", None, None))?;
            permit.forget();
        }

        if self.fail_starts.contains(&range.start_ms) {
            return Err(MediaError::ffmpeg_failed(
                "fake transcode failure",
                None,
                Some(1),
            ));
        }

        tokio::fs::write(output, format!("clip {}", range)).await?;
        Ok(())
    }

    async fn probe_duration(&self, _input: &Path) -> MediaResult<Duration> {
        Ok(self.duration)
    }
}

struct Fixture {
    _dir: TempDir,
    pipeline: Pipeline,
    transcoder: Arc<FakeTranscoder>,
    source: PathBuf,
    rx: mpsc::UnboundedReceiver<(JobId, ProgressMessage)>,
}

async fn fixture(transcoder: FakeTranscoder, mutate: impl FnOnce(&mut PipelineConfig)) -> Fixture {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.mp4");
    tokio::fs::write(&source, b"fake media bytes").await.unwrap();

    let mut config = PipelineConfig {
        work_dir: dir.path().join("work"),
        executor_retries: 1,
        ..Default::default()
    };
    mutate(&mut config);

    let transcoder = Arc::new(transcoder);
    let (notifier, rx) = ChannelNotifier::new();
    let pipeline = Pipeline::with_store(
        config,
        transcoder.clone(),
        Arc::new(notifier),
        Arc::new(MemoryStore::new()),
    )
    .await
    .unwrap();

    Fixture {
        _dir: dir,
        pipeline,
        transcoder,
        source,
        rx,
    }
}

/// Batch text: segment i covers [(i-1)*20s, (i-1)*20s + 10s).
fn batch_text(n: u32) -> String {
    (0..n)
        .map(|i| format!("{}-{}", i * 20, i * 20 + 10))
        .collect::<Vec<_>>()
        .join("\n")
}

fn drain(rx: &mut mpsc::UnboundedReceiver<(JobId, ProgressMessage)>) -> Vec<ProgressMessage> {
    let mut messages = Vec::new();
    while let Ok((_, msg)) = rx.try_recv() {
        messages.push(msg);
    }
    messages
}

#[tokio::test]
async fn test_full_batch_completes_into_archive() {
    let mut fx = fixture(FakeTranscoder::new(), |_| {}).await;

    let plan = fx
        .pipeline
        .plan(&fx.source, &batch_text(5), EdgePadding::default())
        .await
        .unwrap();
    assert_eq!(plan.segments.len(), 5);

    let mut running = fx
        .pipeline
        .submit(OwnerId::from("user1"), &fx.source, plan)
        .await
        .unwrap();
    let report = running.wait().await.unwrap();

    assert_eq!(report.job.state, JobState::Completed);
    assert_eq!(report.job.completed_count, 5);
    assert!(report.job.failed_segments.is_empty());
    assert!(report.failures.is_empty());

    match report.delivery {
        Some(Delivery::Archive { ref path, ref manifest }) => {
            assert!(path.exists());
            assert_eq!(manifest.entries.len(), 5);
        }
        ref other => panic!("expected archive delivery, got {:?}", other),
    }

    let messages = drain(&mut fx.rx);

    // Progress counts are monotonic and reach the total
    let progress: Vec<u32> = messages
        .iter()
        .filter_map(|m| match m {
            ProgressMessage::Progress { completed, .. } => Some(*completed),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 2, 3, 4, 5]);

    // Exactly one terminal notification
    let done: Vec<_> = messages
        .iter()
        .filter(|m| matches!(m, ProgressMessage::Done { .. }))
        .collect();
    assert_eq!(done.len(), 1);
    match done[0] {
        ProgressMessage::Done {
            state,
            delivered,
            failed,
            delivery,
        } => {
            assert_eq!(state.as_str(), "completed");
            assert_eq!(*delivered, 5);
            assert_eq!(*failed, 0);
            assert_eq!(delivery.as_str(), "archive");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_partial_failure_keeps_siblings() {
    // Segment 3 starts at 40s; it fails every attempt
    let mut fx = fixture(FakeTranscoder::new().failing_starts([40_000]), |_| {}).await;

    let plan = fx
        .pipeline
        .plan(&fx.source, &batch_text(5), EdgePadding::default())
        .await
        .unwrap();
    let mut running = fx
        .pipeline
        .submit(OwnerId::from("user1"), &fx.source, plan)
        .await
        .unwrap();
    let report = running.wait().await.unwrap();

    assert_eq!(report.job.state, JobState::PartiallyFailed);
    assert_eq!(report.job.completed_count, 4);
    assert_eq!(
        report.job.failed_segments.iter().copied().collect::<Vec<_>>(),
        vec![3]
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 3);

    // Outputs for segments 1, 2, 4, 5 survive
    match report.delivery {
        Some(Delivery::Archive { ref manifest, .. }) => {
            let ok: Vec<u32> = manifest
                .entries
                .iter()
                .filter(|e| e.name.is_some())
                .map(|e| e.index)
                .collect();
            assert_eq!(ok, vec![1, 2, 4, 5]);
        }
        ref other => panic!("expected archive delivery, got {:?}", other),
    }
}

#[tokio::test]
async fn test_all_failed_reports_error_once() {
    let starts: Vec<u64> = (0..3).map(|i| i * 20_000).collect();
    let mut fx = fixture(FakeTranscoder::new().failing_starts(starts), |_| {}).await;

    let plan = fx
        .pipeline
        .plan(&fx.source, &batch_text(3), EdgePadding::default())
        .await
        .unwrap();
    let mut running = fx
        .pipeline
        .submit(OwnerId::from("user1"), &fx.source, plan)
        .await
        .unwrap();
    let report = running.wait().await.unwrap();

    assert_eq!(report.job.state, JobState::Failed);
    assert!(report.delivery.is_none());

    let messages = drain(&mut fx.rx);
    let errors = messages
        .iter()
        .filter(|m| matches!(m, ProgressMessage::Error { .. }))
        .count();
    let dones = messages
        .iter()
        .filter(|m| matches!(m, ProgressMessage::Done { .. }))
        .count();
    assert_eq!(errors, 1);
    assert_eq!(dones, 0);
}

#[tokio::test]
async fn test_cache_reuse_across_jobs() {
    let fx = fixture(FakeTranscoder::new(), |_| {}).await;

    for expected_calls in [3u32, 3u32] {
        let plan = fx
            .pipeline
            .plan(&fx.source, &batch_text(3), EdgePadding::default())
            .await
            .unwrap();
        let mut running = fx
            .pipeline
            .submit(OwnerId::from("user1"), &fx.source, plan)
            .await
            .unwrap();
        let report = running.wait().await.unwrap();

        assert_eq!(report.job.state, JobState::Completed);
        // Second pass is served entirely from cache
        assert_eq!(fx.transcoder.call_count(), expected_calls);
    }
}

#[tokio::test]
async fn test_parse_errors_never_become_segments() {
    let fx = fixture(FakeTranscoder::new(), |_| {}).await;

    let plan = fx
        .pipeline
        .plan(
            &fx.source,
            "00:00-01:59\n2:00-3:30\nbadrange",
            EdgePadding::default(),
        )
        .await
        .unwrap();

    assert_eq!(plan.segments.len(), 2);
    assert_eq!(plan.parse_error_count(), 1);
    assert!(matches!(
        plan.lines[2].result,
        Err(ParseError::Malformed(_))
    ));
    assert_eq!(plan.segments[0].range, TimeRange::new(0, 119_000).unwrap());
}

#[tokio::test]
async fn test_validation_reports_every_offender() {
    // Source duration is 600s; two ranges end past it
    let fx = fixture(FakeTranscoder::new(), |_| {}).await;

    let error = fx
        .pipeline
        .plan(
            &fx.source,
            "0-10\n500-700\n20-30\n650-800",
            EdgePadding::default(),
        )
        .await
        .unwrap_err();

    let report = match error {
        PipelineError::Validation(report) => report,
        other => panic!("expected validation error, got {:?}", other),
    };
    assert_eq!(report.issues.len(), 2);
    assert!(matches!(
        report.issues[0],
        ValidationIssue::RangeOutOfBounds { index: 2, .. }
    ));
    assert!(matches!(
        report.issues[1],
        ValidationIssue::RangeOutOfBounds { index: 4, .. }
    ));
}

#[tokio::test]
async fn test_admission_cap_released_on_terminal() {
    let gate = Arc::new(Semaphore::new(0));
    let fx = fixture(FakeTranscoder::new().gated(gate.clone()), |_| {}).await;
    let owner = OwnerId::from("user1");

    let plan = fx
        .pipeline
        .plan(&fx.source, &batch_text(2), EdgePadding::default())
        .await
        .unwrap();
    let mut first = fx
        .pipeline
        .submit(owner.clone(), &fx.source, plan.clone())
        .await
        .unwrap();

    // One outstanding batch per user: the second submission bounces
    let rejected = fx
        .pipeline
        .submit(owner.clone(), &fx.source, plan.clone())
        .await;
    match rejected {
        Err(PipelineError::Admission(AdmissionRejected::TooManyActiveJobs {
            active: 1,
            limit: 1,
        })) => {}
        other => panic!("expected capacity rejection, got {:?}", other.map(|_| ())),
    }

    // Let the first job finish; its terminal release restores capacity
    gate.add_permits(64);
    first.wait().await.unwrap();
    assert_eq!(fx.pipeline.admission().active_jobs(&owner).await, 0);

    let mut again = fx
        .pipeline
        .submit(owner.clone(), &fx.source, plan)
        .await
        .unwrap();
    gate.add_permits(64);
    again.wait().await.unwrap();
}

#[tokio::test]
async fn test_cancellation_stops_dispatch() {
    let gate = Arc::new(Semaphore::new(2));
    let mut fx = fixture(FakeTranscoder::new().gated(gate.clone()), |config| {
        config.executor_concurrency = 2;
    })
    .await;

    let plan = fx
        .pipeline
        .plan(&fx.source, &batch_text(10), EdgePadding::default())
        .await
        .unwrap();
    let mut running = fx
        .pipeline
        .submit(OwnerId::from("user1"), &fx.source, plan)
        .await
        .unwrap();

    // Wait for the first two segments to settle
    let mut finished = 0;
    while finished < 2 {
        if let Some((_, msg)) = fx.rx.recv().await {
            if matches!(msg, ProgressMessage::SegmentFinished { .. }) {
                finished += 1;
            }
        }
    }

    running.cancel();
    gate.add_permits(64);
    let report = running.wait().await.unwrap();

    assert_eq!(report.job.state, JobState::Cancelled);
    // Two settled before the flag, and at most `executor_concurrency`
    // in-flight segments were allowed to finish after it
    assert!(report.job.completed_count >= 2);
    assert!(report.job.completed_count <= 4);
    assert!(report.skipped.len() >= 6);
    let settled =
        report.job.completed_count + report.job.failed_segments.len() as u32;
    assert_eq!(settled as usize + report.skipped.len(), 10);
}

#[tokio::test]
async fn test_single_clip_delivery() {
    let fx = fixture(FakeTranscoder::new(), |_| {}).await;

    let plan = fx
        .pipeline
        .plan(&fx.source, "0-10", EdgePadding::default())
        .await
        .unwrap();
    let mut running = fx
        .pipeline
        .submit(OwnerId::from("user1"), &fx.source, plan)
        .await
        .unwrap();
    let report = running.wait().await.unwrap();

    assert_eq!(report.job.state, JobState::Completed);
    match report.delivery {
        Some(Delivery::Single(ref path)) => assert!(path.exists()),
        ref other => panic!("expected single delivery, got {:?}", other),
    }
}
