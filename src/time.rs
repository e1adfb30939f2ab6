use chrono::DateTime;

/// Formats milliseconds as `M:SS`.
pub fn format_time(ms: u64) -> String {
    let total_seconds = ms.saturating_add(500) / 1000;
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Calendar date of an RFC 3339 timestamp as `MM/DD/YYYY`.
/// Unparseable input is returned unchanged.
pub fn format_note_date(created_at: &str) -> String {
    match DateTime::parse_from_rfc3339(created_at) {
        Ok(date) => date.format("%m/%d/%Y").to_string(),
        Err(_) => created_at.to_string(),
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
