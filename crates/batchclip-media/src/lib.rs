//! FFmpeg CLI wrapper for segment extraction.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building for range cuts
//! - Progress parsing from `-progress pipe:2`
//! - Timeout and cooperative cancellation via tokio
//! - FFprobe media information
//! - The `Transcoder` capability trait and its FFmpeg-backed implementation

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod transcode;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use fs_utils::move_file;
pub use probe::{get_duration, probe_media, MediaInfo};
pub use progress::TranscodeProgress;
pub use transcode::{FfmpegTranscoder, Transcoder};
