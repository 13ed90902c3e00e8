use chrono::{DateTime, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a persisted timestamp that may be RFC 3339 text or epoch milliseconds.
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ms) = trimmed.parse::<i64>() {
        return Some(ms);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|d| d.timestamp_millis())
        .ok()
}
