//! The transcoding capability.
//!
//! The pipeline only needs "given an input, a range, and parameters,
//! produce an output file or fail"; the trait keeps it swappable for tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use batchclip_models::{OperationParams, TimeRange};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe;

/// External transcoding capability consumed by the pipeline.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Extract `range` from `input` into `output` according to `params`.
    async fn run(
        &self,
        input: &Path,
        range: TimeRange,
        params: &OperationParams,
        output: &Path,
    ) -> MediaResult<()>;

    /// Report the duration of `input`.
    async fn probe_duration(&self, input: &Path) -> MediaResult<Duration>;
}

/// FFmpeg-backed transcoder.
///
/// Bare `cut` parameters map to a stream-copy cut (fast, no re-encode);
/// any of `vcodec`/`acodec`/`crf`/`preset`/`abitrate` switches the run to
/// a re-encode.
#[derive(Clone, Default)]
pub struct FfmpegTranscoder {
    timeout: Option<Duration>,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill runs that outlive the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Kill in-flight runs when the flag flips to `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    fn build_command(
        &self,
        input: &Path,
        range: TimeRange,
        params: &OperationParams,
        output: &Path,
    ) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(input, output).cut(range);

        if let Some(codec) = params.get("vcodec") {
            cmd = cmd.video_codec(codec);
        }
        if let Some(codec) = params.get("acodec") {
            cmd = cmd.audio_codec(codec);
        }
        if let Some(crf) = params.get("crf").and_then(|v| v.parse().ok()) {
            cmd = cmd.crf(crf);
        }
        if let Some(preset) = params.get("preset") {
            cmd = cmd.preset(preset);
        }
        if let Some(bitrate) = params.get("abitrate") {
            cmd = cmd.audio_bitrate(bitrate);
        }

        cmd
    }

    fn runner(&self) -> FfmpegRunner {
        let mut runner = FfmpegRunner::new();
        if let Some(timeout) = self.timeout {
            runner = runner.with_timeout(timeout);
        }
        if let Some(rx) = &self.cancel_rx {
            runner = runner.with_cancel(rx.clone());
        }
        runner
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(
        &self,
        input: &Path,
        range: TimeRange,
        params: &OperationParams,
        output: &Path,
    ) -> MediaResult<()> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }

        info!(
            input = %input.display(),
            range = %range,
            operation = params.operation(),
            "Extracting segment"
        );

        let cmd = self.build_command(input, range, params, output);
        self.runner().run(&cmd).await?;

        if !output.exists() {
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg completed but output file not found",
                None,
                None,
            ));
        }

        Ok(())
    }

    async fn probe_duration(&self, input: &Path) -> MediaResult<Duration> {
        probe::get_duration(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> TimeRange {
        TimeRange::new(0, 10_000).unwrap()
    }

    #[test]
    fn test_bare_cut_is_stream_copy() {
        let transcoder = FfmpegTranscoder::new();
        let cmd = transcoder.build_command(
            Path::new("in.mp4"),
            range(),
            &OperationParams::cut(),
            Path::new("out.mp4"),
        );
        let args = cmd.build_args();
        assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
    }

    #[test]
    fn test_encode_params_trigger_reencode() {
        let transcoder = FfmpegTranscoder::new();
        let params = OperationParams::cut()
            .with_param("crf", "20")
            .with_param("preset", "medium");
        let cmd = transcoder.build_command(
            Path::new("in.mp4"),
            range(),
            &params,
            Path::new("out.mp4"),
        );
        let args = cmd.build_args();
        assert!(!args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == "20"));
    }

    #[tokio::test]
    async fn test_run_missing_input() {
        let transcoder = FfmpegTranscoder::new();
        let result = transcoder
            .run(
                Path::new("/nonexistent/in.mp4"),
                range(),
                &OperationParams::cut(),
                Path::new("/tmp/out.mp4"),
            )
            .await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
