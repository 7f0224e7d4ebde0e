//! FFmpeg progress parsing.
//!
//! FFmpeg writes `key=value` lines to the `-progress` output; a block ends
//! with a `progress=continue|end` line. The parser accumulates values and
//! yields a snapshot at each block boundary.

use serde::{Deserialize, Serialize};

/// Progress snapshot from a running FFmpeg process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscodeProgress {
    /// Output position in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed relative to realtime (1.5 = 1.5x)
    pub speed: f64,
    /// Whether the final block has been seen
    pub is_complete: bool,
}

impl TranscodeProgress {
    /// Progress percentage against a total output duration.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }
}

/// Feed one `-progress` line into the accumulator.
///
/// Returns a snapshot when the line closes a progress block.
pub(crate) fn parse_progress_line(
    line: &str,
    current: &mut TranscodeProgress,
) -> Option<TranscodeProgress> {
    let (key, value) = line.trim().split_once('=')?;

    match key {
        "out_time_ms" | "out_time_us" => {
            // Despite its name, out_time_ms is in microseconds in modern
            // FFmpeg; both keys carry microseconds.
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            return Some(current.clone());
        }
        _ => {}
    }

    None
}
