//! Segment executor.
//!
//! Drives one segment through cache lookup, the external transcoder, and
//! cache store. Temporary files live in a scoped directory so every exit
//! path — success, failure, timeout, cancellation — releases them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use batchclip_cache::{CacheKey, ContentCache, Fingerprint};
use batchclip_media::Transcoder;
use batchclip_models::Segment;

use crate::config::PipelineConfig;
use crate::error::ExecutionError;
use crate::retry::{retry_async, RetryConfig};

/// Result of executing one segment.
#[derive(Debug, Clone)]
pub struct SegmentOutput {
    /// 1-based batch position
    pub index: u32,
    /// Cached output file, valid until cache eviction
    pub location: PathBuf,
    /// Output size in bytes
    pub size_bytes: u64,
    /// Whether the output came from the cache without a transcoder run
    pub from_cache: bool,
}

/// Per-attempt failure, folded into `ExecutionError` once retries are
/// exhausted.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("{0}")]
    Transcode(String),

    #[error("deadline of {0}s exceeded")]
    Timeout(u64),
}

/// Invokes the external transcoding capability for one segment, with
/// cache reuse and bounded retry.
pub struct SegmentExecutor {
    transcoder: Arc<dyn Transcoder>,
    cache: Arc<ContentCache>,
    retry: RetryConfig,
    segment_timeout: Duration,
    work_dir: PathBuf,
}

impl SegmentExecutor {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        cache: Arc<ContentCache>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            transcoder,
            cache,
            retry: RetryConfig::new("segment_transcode")
                .with_max_retries(config.executor_retries),
            segment_timeout: config.segment_timeout,
            work_dir: config.work_dir.clone(),
        }
    }

    /// Execute one segment.
    ///
    /// A cache hit returns without invoking the transcoder. A miss runs
    /// the transcoder into a fresh temp file per attempt, retrying
    /// immediately up to the configured bound; the produced output is
    /// moved into the cache and the cached location returned.
    pub async fn execute(
        &self,
        fingerprint: &Fingerprint,
        segment: &Segment,
    ) -> Result<SegmentOutput, ExecutionError> {
        let key = CacheKey::for_segment(fingerprint, segment);

        if let Some(entry) = self.cache.lookup(&key).await {
            debug!(index = segment.index, key = %key, "Segment served from cache");
            return Ok(SegmentOutput {
                index: segment.index,
                location: entry.output_location,
                size_bytes: entry.size_bytes,
                from_cache: true,
            });
        }

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("seg-")
            .tempdir_in(&self.work_dir)?;

        let ext = segment
            .source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_string();

        let produced = retry_async(&self.retry, |attempt| {
            let output = scratch.path().join(format!("attempt_{}.{}", attempt, ext));
            async move {
                self.run_attempt(segment, &output).await?;
                Ok::<PathBuf, AttemptError>(output)
            }
        })
        .await
        .into_result()
        .map_err(|(error, attempts)| {
            warn!(
                index = segment.index,
                attempts,
                error = %error,
                "Segment failed after exhausting retries"
            );
            match error {
                AttemptError::Timeout(limit_secs) => ExecutionError::Timeout {
                    limit_secs,
                    attempts,
                },
                AttemptError::Transcode(message) => ExecutionError::Transcode { message, attempts },
            }
        })?;

        let size_bytes = tokio::fs::metadata(&produced).await?.len();
        let entry = self.cache.store(key, &produced, size_bytes).await?;

        Ok(SegmentOutput {
            index: segment.index,
            location: entry.output_location,
            size_bytes: entry.size_bytes,
            from_cache: false,
        })
        // `scratch` drops here, removing whatever an attempt left behind.
    }

    /// One transcoder invocation under the per-segment deadline.
    async fn run_attempt(
        &self,
        segment: &Segment,
        output: &std::path::Path,
    ) -> Result<(), AttemptError> {
        let run = self
            .transcoder
            .run(&segment.source, segment.range, &segment.params, output);

        match tokio::time::timeout(self.segment_timeout, run).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_timeout() => {
                Err(AttemptError::Timeout(self.segment_timeout.as_secs()))
            }
            Ok(Err(e)) => Err(AttemptError::Transcode(e.to_string())),
            Err(_) => Err(AttemptError::Timeout(self.segment_timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use batchclip_cache::MemoryStore;
    use batchclip_media::{MediaError, MediaResult};
    use batchclip_models::{OperationParams, TimeRange};

    /// Transcoder that fails the first `fail_first` invocations, then
    /// writes a small output. An optional delay simulates slow runs.
    struct FakeTranscoder {
        calls: AtomicU32,
        fail_first: u32,
        delay: Option<Duration>,
    }

    impl FakeTranscoder {
        fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                delay: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: 0,
                delay: Some(delay),
            }
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
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if call <= self.fail_first {
                return Err(MediaError::ffmpeg_failed("fake failure", None, Some(1)));
            }
            tokio::fs::write(output, format!("clip {}", range)).await?;
            Ok(())
        }

        async fn probe_duration(&self, _input: &Path) -> MediaResult<Duration> {
            Ok(Duration::from_secs(60))
        }
    }

    struct Fixture {
        _dir: TempDir,
        executor: SegmentExecutor,
        transcoder: Arc<FakeTranscoder>,
        cache: Arc<ContentCache>,
        work_dir: PathBuf,
    }

    async fn fixture(transcoder: FakeTranscoder, timeout: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let work_dir = dir.path().join("work");
        let cache = Arc::new(
            ContentCache::open(dir.path().join("cache"), Arc::new(MemoryStore::new()))
                .await
                .unwrap(),
        );
        let transcoder = Arc::new(transcoder);
        let config = PipelineConfig {
            executor_retries: 2,
            segment_timeout: timeout,
            work_dir: work_dir.clone(),
            ..Default::default()
        };
        let executor = SegmentExecutor::new(transcoder.clone(), cache.clone(), &config);
        Fixture {
            _dir: dir,
            executor,
            transcoder,
            cache,
            work_dir,
        }
    }

    fn segment(index: u32) -> Segment {
        Segment::new(
            index,
            TimeRange::new(u64::from(index) * 10_000, u64::from(index) * 10_000 + 5_000).unwrap(),
            "/tmp/source.mp4",
            OperationParams::cut(),
        )
    }

    fn fp() -> Fingerprint {
        Fingerprint::from_hex("12".repeat(32))
    }

    async fn scratch_dirs(work_dir: &Path) -> usize {
        let mut count = 0;
        if let Ok(mut entries) = tokio::fs::read_dir(work_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.file_name().to_string_lossy().starts_with("seg-") {
                    count += 1;
                }
            }
        }
        count
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let fx = fixture(FakeTranscoder::new(0), Duration::from_secs(5)).await;

        let first = fx.executor.execute(&fp(), &segment(1)).await.unwrap();
        assert!(!first.from_cache);
        assert!(first.location.exists());
        assert_eq!(fx.transcoder.call_count(), 1);

        // Identical work never reaches the transcoder again
        let second = fx.executor.execute(&fp(), &segment(1)).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.location, first.location);
        assert_eq!(fx.transcoder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_success() {
        let fx = fixture(FakeTranscoder::new(2), Duration::from_secs(5)).await;

        let output = fx.executor.execute(&fp(), &segment(1)).await.unwrap();
        assert!(!output.from_cache);
        // Initial attempt plus two retries
        assert_eq!(fx.transcoder.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let fx = fixture(FakeTranscoder::new(10), Duration::from_secs(5)).await;

        let error = fx.executor.execute(&fp(), &segment(1)).await.unwrap_err();
        match error {
            ExecutionError::Transcode { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fx.transcoder.call_count(), 3);
        // Nothing cached for the failed segment
        assert!(fx.cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_timeout_is_execution_error() {
        let fx = fixture(
            FakeTranscoder::slow(Duration::from_secs(5)),
            Duration::from_millis(20),
        )
        .await;

        let error = fx.executor.execute(&fp(), &segment(1)).await.unwrap_err();
        assert!(error.is_timeout());
        // Timeouts retry like any other failure
        assert_eq!(fx.transcoder.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scratch_cleanup_on_all_paths() {
        let fx = fixture(FakeTranscoder::new(1), Duration::from_secs(5)).await;

        fx.executor.execute(&fp(), &segment(1)).await.unwrap();
        assert_eq!(scratch_dirs(&fx.work_dir).await, 0);

        let failing = fixture(FakeTranscoder::new(10), Duration::from_secs(5)).await;
        let _ = failing.executor.execute(&fp(), &segment(2)).await;
        assert_eq!(scratch_dirs(&failing.work_dir).await, 0);
    }
}
