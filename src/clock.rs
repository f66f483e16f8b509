//! Timestamp helpers shared by the wire protocol and status documents.

use chrono::{DateTime, SubsecRound, Utc};

/// Current UTC time truncated to milliseconds.
///
/// Status documents render timestamps with millisecond precision, so records
/// built from this value survive a render/parse cycle unchanged.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Format a timestamp as ISO 8601 with milliseconds, e.g. `2026-02-04T10:00:00.123Z`.
pub fn format_iso(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Returns the current UTC time as an ISO 8601 string with milliseconds.
pub fn now_iso() -> String {
    format_iso(&Utc::now())
}

/// Parse an RFC 3339 / ISO 8601 timestamp into UTC.
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
