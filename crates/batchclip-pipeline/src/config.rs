//! Pipeline configuration.
//!
//! An explicit configuration object handed to each component at
//! construction, so components are testable in isolation with fabricated
//! config.

use std::path::PathBuf;
use std::time::Duration;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum segments per batch
    pub max_segments: usize,
    /// Maximum source file size in bytes
    pub max_file_size_bytes: u64,
    /// Sliding window for the per-owner request limit
    pub rate_limit_window: Duration,
    /// Maximum admitted requests per owner per window
    pub rate_limit_max_requests: u32,
    /// Maximum concurrent jobs per owner
    pub max_active_jobs: u32,
    /// Cache entry lifetime
    pub cache_max_age: Duration,
    /// Maximum concurrent segment executions per job
    pub executor_concurrency: usize,
    /// Retries per segment after the initial attempt
    pub executor_retries: u32,
    /// Per-segment execution deadline
    pub segment_timeout: Duration,
    /// Archive the outputs when at least this many segments succeed
    pub per_file_threshold: usize,
    /// Work directory for temporary files and the cache
    pub work_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_segments: 100,
            max_file_size_bytes: 50_000_000,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 10,
            max_active_jobs: 1,
            cache_max_age: Duration::from_secs(604_800), // 7 days
            executor_concurrency: 4,
            executor_retries: 2,
            segment_timeout: Duration::from_secs(600),
            per_file_threshold: 2,
            work_dir: PathBuf::from("/tmp/batchclip"),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_segments: env_parse("BATCHCLIP_MAX_SEGMENTS", defaults.max_segments),
            max_file_size_bytes: env_parse(
                "BATCHCLIP_MAX_FILE_SIZE_BYTES",
                defaults.max_file_size_bytes,
            ),
            rate_limit_window: Duration::from_millis(env_parse(
                "BATCHCLIP_RATE_LIMIT_WINDOW_MS",
                defaults.rate_limit_window.as_millis() as u64,
            )),
            rate_limit_max_requests: env_parse(
                "BATCHCLIP_RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            ),
            max_active_jobs: env_parse("BATCHCLIP_MAX_ACTIVE_JOBS", defaults.max_active_jobs),
            cache_max_age: Duration::from_secs(env_parse(
                "BATCHCLIP_CACHE_MAX_AGE_SECS",
                defaults.cache_max_age.as_secs(),
            )),
            executor_concurrency: env_parse(
                "BATCHCLIP_EXECUTOR_CONCURRENCY",
                defaults.executor_concurrency,
            ),
            executor_retries: env_parse("BATCHCLIP_EXECUTOR_RETRIES", defaults.executor_retries),
            segment_timeout: Duration::from_secs(env_parse(
                "BATCHCLIP_SEGMENT_TIMEOUT_SECS",
                defaults.segment_timeout.as_secs(),
            )),
            per_file_threshold: env_parse(
                "BATCHCLIP_PER_FILE_THRESHOLD",
                defaults.per_file_threshold,
            ),
            work_dir: std::env::var("BATCHCLIP_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        }
    }

    /// Cache directory under the work dir.
    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir.join("cache")
    }

    /// Cache index file under the cache dir.
    pub fn cache_index_path(&self) -> PathBuf {
        self.cache_dir().join("index.json")
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
