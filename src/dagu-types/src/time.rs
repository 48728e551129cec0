//! RFC3339 helpers for the persisted timestamp formats.
//!
//! Persisted timestamps are RFC3339 UTC; a zero time is the empty string.
//! The legacy `YYYY-MM-DD HH:MM:SS` form and the literal `-` token both
//! parse to a zero time for backward compatibility with older attempts.

use chrono::{DateTime, NaiveDateTime, Utc};

const LEGACY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format `t` as RFC3339 UTC, or the empty string for `None`.
pub fn to_rfc3339(t: Option<DateTime<Utc>>) -> String {
    match t {
        Some(t) => t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        None => String::new(),
    }
}

/// Parse a persisted timestamp: RFC3339, the legacy space-separated form,
/// or `-`/empty for a zero time.
pub fn parse_flexible(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() || s == "-" {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, LEGACY_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
