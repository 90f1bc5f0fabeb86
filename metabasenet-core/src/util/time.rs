//! Wall-clock access and formatting

use chrono::{Local, TimeZone, Utc};

use crate::types::Timestamp;

/// Seconds since the Unix epoch
pub fn now_utc_seconds() -> Timestamp {
    Utc::now().timestamp().max(0) as Timestamp
}

/// Milliseconds since the Unix epoch
pub fn now_utc_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Format an instant as `YYYY-MM-DD HH:MM:SS` in UTC
pub fn format_utc(ts: Timestamp) -> String {
    match Utc.timestamp_opt(ts as i64, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("<invalid time {}>", ts),
    }
}

/// Format an instant as `YYYY-MM-DD HH:MM:SS` in the local zone
pub fn format_local(ts: Timestamp) -> String {
    match Local.timestamp_opt(ts as i64, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("<invalid time {}>", ts),
    }
}
