//! Timestamp normalization across monitoring sources.
//!
//! Every source hands us timestamps in a different shape: epoch seconds,
//! epoch milliseconds, ISO-8601 strings, or a locale stamp buried inside a
//! free-text alert body. Everything is normalized to epoch seconds (UTC).
//! Unparseable input yields `None`, never a guessed zero.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Epoch values above this are treated as milliseconds.
const MS_THRESHOLD: i64 = 10_000_000_000;

/// Normalize an arbitrary JSON value to epoch seconds.
///
/// Priority order: numeric epoch, digit-only string, ISO-8601 (UTC assumed
/// when no offset is present), then the two free-text stamp patterns.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let ts = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Some(scale_epoch(ts))
        }
        Value::String(s) => parse_ts_str(s),
        _ => None,
    }
}

/// Normalize a string timestamp to epoch seconds.
pub fn parse_ts_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        let ts: i64 = s.parse().ok()?;
        return Some(scale_epoch(ts));
    }

    // ISO-8601 with an explicit offset (or trailing Z).
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }

    // ISO-8601 without offset: assume UTC.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive).timestamp());
        }
    }

    extract_event_time(s)
}

/// Scan free text for an embedded event stamp.
///
/// Recognizes `HH:MM:SS/YYYY.MM.DD` (the "Last check" footer our alert mails
/// carry) and `YYYY-MM-DD HH:MM:SS`, in that order. Both are exactly 19
/// bytes, so a sliding window plus a strict chrono parse replaces a regex.
pub fn extract_event_time(text: &str) -> Option<i64> {
    find_stamp(text, "%H:%M:%S/%Y.%m.%d").or_else(|| find_stamp(text, "%Y-%m-%d %H:%M:%S"))
}

fn find_stamp(text: &str, fmt: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    const STAMP_LEN: usize = 19;
    if bytes.len() < STAMP_LEN {
        return None;
    }
    for start in 0..=(bytes.len() - STAMP_LEN) {
        // Candidate windows start on a digit; everything in both patterns
        // is ASCII, so byte slicing is safe after this check.
        if !bytes[start].is_ascii_digit() {
            continue;
        }
        let window = &bytes[start..start + STAMP_LEN];
        if !window.is_ascii() {
            continue;
        }
        let candidate = std::str::from_utf8(window).ok()?;
        if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, fmt) {
            return Some(Utc.from_utc_datetime(&naive).timestamp());
        }
    }
    None
}

fn scale_epoch(ts: i64) -> i64 {
    if ts > MS_THRESHOLD {
        ts / 1000
    } else {
        ts
    }
}

/// Format epoch seconds as a readable UTC stamp for reports.
pub fn readable(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.to_rfc3339(),
        None => ts.to_string(),
    }
}
