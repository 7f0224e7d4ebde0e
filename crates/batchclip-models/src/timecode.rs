//! Timecode parsing.
//!
//! Turns free-form user text into time ranges. Supported endpoint formats
//! are `H:MM:SS`, `M:SS`, and bare seconds, each with an optional
//! fractional part; a range separates its endpoints with `-` or `to`.
//! Batch input splits on newlines plus `,`/`;`.

use thiserror::Error;

use crate::range::TimeRange;

/// Per-entry parse failure. Reported inline; a batch never fails as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Entry is not a recognizable timecode range.
    #[error("malformed timecode range: '{0}'")]
    Malformed(String),

    /// Both endpoints parsed but the end does not come after the start.
    #[error("range end is not after start: '{0}'")]
    EndBeforeStart(String),
}

/// One entry of a batch: the raw text and its parse outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// Raw entry text, trimmed.
    pub raw: String,
    /// Parse outcome for this entry.
    pub result: Result<TimeRange, ParseError>,
}

/// Parse a single timecode to milliseconds.
///
/// # Examples
/// ```
/// use batchclip_models::timecode::parse_timecode;
/// assert_eq!(parse_timecode("01:30:00").unwrap(), 5_400_000);
/// assert_eq!(parse_timecode("5:30").unwrap(), 330_000);
/// assert_eq!(parse_timecode("90").unwrap(), 90_000);
/// assert_eq!(parse_timecode("1:02.5").unwrap(), 62_500);
/// ```
pub fn parse_timecode(ts: &str) -> Result<u64, ParseError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(ParseError::Malformed(ts.to_string()));
    }

    let malformed = || ParseError::Malformed(ts.to_string());

    let parts: Vec<&str> = ts.split(':').collect();
    let (hours, minutes, seconds) = match parts.len() {
        1 => (0u64, 0u64, parse_seconds(parts[0]).ok_or_else(malformed)?),
        2 => (
            0u64,
            parse_whole(parts[0]).ok_or_else(malformed)?,
            parse_seconds(parts[1]).ok_or_else(malformed)?,
        ),
        3 => (
            parse_whole(parts[0]).ok_or_else(malformed)?,
            parse_whole(parts[1]).ok_or_else(malformed)?,
            parse_seconds(parts[2]).ok_or_else(malformed)?,
        ),
        _ => return Err(malformed()),
    };

    Ok((hours * 3600 + minutes * 60) * 1000 + seconds)
}

/// Parse a whole (non-fractional) component such as hours or minutes.
fn parse_whole(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parse a seconds component, allowing a fractional part, to milliseconds.
fn parse_seconds(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    let secs: f64 = s.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0).round() as u64)
}

/// Parse a range expression: two timecodes separated by `-` or `to`,
/// with optional whitespace around the separator.
pub fn parse_range(entry: &str) -> Result<TimeRange, ParseError> {
    let raw = entry.trim();

    // Endpoints contain only digits, ':' and '.', so rewriting the word
    // separator to '-' is unambiguous.
    let normalized = raw.to_ascii_lowercase().replace("to", "-");

    let Some((start, end)) = normalized.split_once('-') else {
        return Err(ParseError::Malformed(raw.to_string()));
    };

    let start_ms = parse_timecode(start)?;
    let end_ms = parse_timecode(end)?;

    TimeRange::new(start_ms, end_ms).ok_or_else(|| ParseError::EndBeforeStart(raw.to_string()))
}

/// Default inline delimiters recognized in addition to newlines.
pub const DEFAULT_DELIMITERS: &[char] = &[',', ';'];

/// Parse batch text into a lazy sequence of per-entry outcomes.
///
/// Entries split on newlines and on `,`/`;` within a line, blank entries
/// skipped, input order preserved. Partial success is expected: each entry
/// carries its own `Result`.
pub fn parse_batch(text: &str) -> impl Iterator<Item = ParsedLine> + '_ {
    parse_batch_with_delimiters(text, DEFAULT_DELIMITERS)
}

/// [`parse_batch`] with a custom inline delimiter set.
pub fn parse_batch_with_delimiters<'a>(
    text: &'a str,
    delimiters: &'a [char],
) -> impl Iterator<Item = ParsedLine> + 'a {
    text.lines()
        .flat_map(move |line| line.split(delimiters))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| ParsedLine {
            raw: entry.to_string(),
            result: parse_range(entry),
        })
}

/// Format milliseconds as `HH:MM:SS`, with a `.mmm` suffix when the value
/// is not second-aligned.
pub fn format_timecode(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;

    if millis == 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timecode_formats() {
        assert_eq!(parse_timecode("00:00:00").unwrap(), 0);
        assert_eq!(parse_timecode("00:01:00").unwrap(), 60_000);
        assert_eq!(parse_timecode("01:30:45").unwrap(), 5_445_000);
        assert_eq!(parse_timecode("53:53").unwrap(), 3_233_000);
        assert_eq!(parse_timecode("0").unwrap(), 0);
        assert_eq!(parse_timecode(" 90 ").unwrap(), 90_000);
    }

    #[test]
    fn test_parse_timecode_fractional() {
        assert_eq!(parse_timecode("30.5").unwrap(), 30_500);
        assert_eq!(parse_timecode("00:00:30.125").unwrap(), 30_125);
    }

    #[test]
    fn test_parse_timecode_rejects_garbage() {
        assert!(parse_timecode("").is_err());
        assert!(parse_timecode("abc").is_err());
        assert!(parse_timecode("1:2:3:4").is_err());
        assert!(parse_timecode("-5").is_err());
        assert!(parse_timecode("1:xx").is_err());
    }

    #[test]
    fn test_parse_range_separators() {
        let expected = TimeRange::new(0, 119_000).unwrap();
        assert_eq!(parse_range("00:00-01:59").unwrap(), expected);
        assert_eq!(parse_range("00:00 - 01:59").unwrap(), expected);
        assert_eq!(parse_range("00:00 to 01:59").unwrap(), expected);
        assert_eq!(parse_range("0:0-1:59").unwrap(), expected);
    }

    #[test]
    fn test_parse_range_end_before_start() {
        assert!(matches!(
            parse_range("02:00-01:00"),
            Err(ParseError::EndBeforeStart(_))
        ));
        assert!(matches!(
            parse_range("01:00-01:00"),
            Err(ParseError::EndBeforeStart(_))
        ));
    }

    #[test]
    fn test_parse_batch_partial_success() {
        let lines: Vec<ParsedLine> = parse_batch("00:00-01:59\n2:00-3:30\nbadrange").collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].result, Ok(TimeRange::new(0, 119_000).unwrap()));
        assert_eq!(
            lines[1].result,
            Ok(TimeRange::new(120_000, 210_000).unwrap())
        );
        assert!(matches!(lines[2].result, Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_parse_batch_inline_delimiters() {
        let lines: Vec<ParsedLine> = parse_batch("0-10, 20-30; 40-50\n\n60-70").collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.result.is_ok()));
    }

    #[test]
    fn test_parse_batch_custom_delimiters() {
        let lines: Vec<ParsedLine> =
            parse_batch_with_delimiters("0-10 | 20-30", &['|']).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.result.is_ok()));
    }

    #[test]
    fn test_format_round_trip() {
        for ms in [0u64, 500, 90_000, 119_000, 5_445_000, 62_500] {
            let formatted = format_timecode(ms);
            assert_eq!(parse_timecode(&formatted).unwrap(), ms, "{}", formatted);
        }
    }
}
