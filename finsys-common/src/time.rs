//! Timestamp utilities
//!
//! The relational store keeps timestamps as unix milliseconds so that
//! `ORDER BY` on them is numeric, not lexical.

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp, truncated to millisecond precision
///
/// Truncation keeps in-memory values equal to what a later read of the
/// same row returns.
pub fn now() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Convert a timestamp to unix milliseconds for storage
pub fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

/// Convert stored unix milliseconds back to a UTC timestamp
///
/// Out-of-range values clamp to the unix epoch rather than failing a read.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
