//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as Unix epoch milliseconds
///
/// Used as the last-resort uniqueness suffix when renaming accounts.
pub fn unix_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render a timestamp the way it is stored in SQLite text columns
pub fn to_db_string(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a stored timestamp, tolerating SQLite's `CURRENT_TIMESTAMP` format
pub fn from_db_string(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
