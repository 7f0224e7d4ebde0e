//! FFmpeg command builder and runner for segment cuts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

use batchclip_models::TimeRange;

use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_progress_line, TranscodeProgress};

/// Builder for an FFmpeg invocation that extracts one time range.
///
/// Seeking uses a single input-side `-ss`; with stream copy a second
/// output-side seek would drop packets without their keyframes and produce
/// frozen frames.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    range: Option<TimeRange>,
    stream_copy: bool,
    video_codec: Option<String>,
    audio_codec: Option<String>,
    crf: Option<u8>,
    preset: Option<String>,
    audio_bitrate: Option<String>,
}

impl FfmpegCommand {
    /// Create a command from input to output, overwriting the output.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            range: None,
            stream_copy: true,
            video_codec: None,
            audio_codec: None,
            crf: None,
            preset: None,
            audio_bitrate: None,
        }
    }

    /// Restrict the invocation to a time range.
    pub fn cut(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Re-encode with the given video codec instead of stream copy.
    pub fn video_codec(mut self, codec: impl Into<String>) -> Self {
        self.stream_copy = false;
        self.video_codec = Some(codec.into());
        self
    }

    /// Audio codec for re-encode runs.
    pub fn audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.stream_copy = false;
        self.audio_codec = Some(codec.into());
        self
    }

    /// Constant rate factor (quality) for re-encode runs.
    pub fn crf(mut self, crf: u8) -> Self {
        self.stream_copy = false;
        self.crf = Some(crf);
        self
    }

    /// Encoder preset for re-encode runs.
    pub fn preset(mut self, preset: impl Into<String>) -> Self {
        self.stream_copy = false;
        self.preset = Some(preset.into());
        self
    }

    /// Audio bitrate for re-encode runs.
    pub fn audio_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.stream_copy = false;
        self.audio_bitrate = Some(bitrate.into());
        self
    }

    /// Build the argument vector.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-v".into(),
            "error".into(),
            "-progress".into(),
            "pipe:2".into(),
        ];

        if let Some(range) = &self.range {
            args.push("-ss".into());
            args.push(format!("{:.3}", range.start_secs()));
        }

        args.push("-i".into());
        args.push(self.input.to_string_lossy().into_owned());

        if let Some(range) = &self.range {
            args.push("-t".into());
            args.push(format!("{:.3}", range.duration_secs()));
        }

        if self.stream_copy {
            args.push("-c".into());
            args.push("copy".into());
            // Stream copy starts at a keyframe; rebase timestamps so the
            // output does not begin with negative PTS.
            args.push("-avoid_negative_ts".into());
            args.push("make_zero".into());
        } else {
            args.push("-c:v".into());
            args.push(self.video_codec.clone().unwrap_or_else(|| "libx264".into()));
            if let Some(crf) = self.crf {
                args.push("-crf".into());
                args.push(crf.to_string());
            }
            if let Some(preset) = &self.preset {
                args.push("-preset".into());
                args.push(preset.clone());
            }
            args.push("-c:a".into());
            args.push(self.audio_codec.clone().unwrap_or_else(|| "aac".into()));
            if let Some(bitrate) = &self.audio_bitrate {
                args.push("-b:a".into());
                args.push(bitrate.clone());
            }
        }

        args.push("-movflags".into());
        args.push("+faststart".into());

        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

/// Runner for FFmpeg commands with progress tracking, timeout, and
/// cooperative cancellation.
#[derive(Default)]
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the process when the flag flips to `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Kill the process if it outlives the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run the command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run the command, invoking `on_progress` at each progress block.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, on_progress: F) -> MediaResult<()>
    where
        F: Fn(TranscodeProgress) + Send + 'static,
    {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // FFmpeg interleaves -progress blocks and error lines on stderr;
        // keep the tail for failure reporting.
        let stderr = child.stderr.take();
        let progress_handle = tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                let mut current = TranscodeProgress::default();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(snapshot) = parse_progress_line(&line, &mut current) {
                        on_progress(snapshot);
                    } else if !line.contains('=') {
                        if tail.len() >= 20 {
                            tail.remove(0);
                        }
                        tail.push(line);
                    }
                }
            }
            tail
        });

        let wait_result = self.wait_for_exit(&mut child).await;
        let stderr_tail = progress_handle.await.unwrap_or_default();

        match wait_result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr_tail.join("\n")),
                status.code(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Wait for the child, enforcing cancellation and the deadline.
    async fn wait_for_exit(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        enum Outcome {
            Exited(std::io::Result<std::process::ExitStatus>),
            Cancelled,
            TimedOut,
        }

        let mut cancel_rx = self.cancel_rx.clone();
        let deadline = self.timeout;

        let cancelled = async {
            match cancel_rx.as_mut() {
                Some(rx) => {
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            // Sender dropped: no cancellation will ever arrive.
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending().await,
            }
        };

        let timed_out = async {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        // The wait future borrows the child; resolve the race first, then
        // act on the child once the borrow is released.
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = cancelled => Outcome::Cancelled,
            _ = timed_out => Outcome::TimedOut,
        };

        match outcome {
            Outcome::Exited(status) => Ok(status?),
            Outcome::Cancelled => {
                debug!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            Outcome::TimedOut => {
                let limit = deadline.unwrap_or_default().as_secs();
                warn!("FFmpeg timed out after {}s, killing process", limit);
                let _ = child.kill().await;
                Err(MediaError::Timeout(limit))
            }
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
