//! Resume cursors derived from persisted log lines.
//!
//! A cursor is the Unix-millisecond timestamp of the last persisted line. It is
//! never stored on its own; backends recompute it from the last line they hold.

use chrono::DateTime;

/// Unix timestamp in milliseconds.
pub type TimestampMs = i64;

/// Safety margin subtracted from a cursor before reopening a stream, so a line
/// sharing the cursor's timestamp is delivered again rather than lost.
pub const RESUME_MARGIN_MS: TimestampMs = 1;

/// Parse the leading whitespace-delimited token of `line` as an RFC 3339 timestamp.
///
/// Returns `None` for blank or malformed lines.
pub fn parse_line_timestamp(line: &str) -> Option<TimestampMs> {
    let token = line.split_whitespace().next()?;
    DateTime::parse_from_rfc3339(token)
        .ok()
        .map(|ts| ts.timestamp_millis())
}

/// Return the last non-blank line of `bytes`, ignoring trailing line breaks.
pub fn last_line(bytes: &[u8]) -> Option<&[u8]> {
    bytes
        .split(|b| *b == b'\n')
        .rev()
        .find(|line| line.iter().any(|b| !b.is_ascii_whitespace()))
}

/// Cursor of the last line in `bytes`, if it carries a parsable timestamp.
pub fn latest_timestamp(bytes: &[u8]) -> Option<TimestampMs> {
    let line = last_line(bytes)?;
    parse_line_timestamp(&String::from_utf8_lossy(line))
}

/// Point from which a resumed stream must start for `cursor`.
pub const fn resume_point(cursor: TimestampMs) -> TimestampMs {
    cursor - RESUME_MARGIN_MS
}
