//! Timestamp helpers shared by every record family.
//!
//! Rows carry human-readable second-precision local timestamps; presence
//! freshness uses epoch seconds so age math stays in plain floats.

use chrono::{DateTime, Local, NaiveDateTime, Utc};

const STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Current local time as a second-precision row timestamp.
pub fn now_stamp() -> String {
    Local::now().format(STAMP_FORMAT).to_string()
}

/// Formats a naive local time the way rows carry it.
pub fn format_stamp(when: NaiveDateTime) -> String {
    when.format(STAMP_FORMAT).to_string()
}

/// Current time as fractional epoch seconds.
pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Parses a row timestamp back into local naive time.
///
/// Accepts the canonical format, the same with fractional seconds, and
/// RFC 3339. Returns `None` for anything else.
pub fn parse_stamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, STAMP_FORMAT) {
        return Some(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Local).naive_local())
}

/// Local naive time used when comparing against row timestamps.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_round_trips() {
        let stamp = now_stamp();
        assert!(parse_stamp(&stamp).is_some());
    }

    #[test]
    fn parses_fractional_and_rfc3339() {
        assert!(parse_stamp("2026-08-22T10:00:00.123456").is_some());
        assert!(parse_stamp("2026-08-22T10:00:00+02:00").is_some());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_stamp("").is_none());
        assert!(parse_stamp("not a time").is_none());
        assert!(parse_stamp("2026-13-90").is_none());
    }
}
