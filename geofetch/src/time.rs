//! Time-related utility functions.
//!
//! Cache freshness arithmetic runs entirely on epoch milliseconds, so this
//! module provides the conversions between `SystemTime`, epoch millis, and
//! the RFC 1123 dates that appear in HTTP headers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    system_time_to_millis(SystemTime::now())
}

/// Convert a `SystemTime` to epoch milliseconds.
///
/// Times before the epoch clamp to 0; cache timestamps are never negative.
pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

/// Convert epoch milliseconds back to a `SystemTime`.
pub fn millis_to_system_time(millis: i64) -> SystemTime {
    if millis <= 0 {
        UNIX_EPOCH
    } else {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    }
}

/// Parse an RFC 1123 HTTP date (e.g. from `Date` or `Expires` headers)
/// into epoch milliseconds.
///
/// Returns `None` for malformed dates; HTTP requires lenient receivers here.
pub fn parse_http_date_millis(value: &str) -> Option<i64> {
    httpdate::parse_http_date(value.trim())
        .ok()
        .map(system_time_to_millis)
}

/// Format epoch milliseconds as an RFC 1123 HTTP date, suitable for
/// `If-Modified-Since` request headers.
pub fn format_http_date_millis(millis: i64) -> String {
    httpdate::fmt_http_date(millis_to_system_time(millis))
}
