use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

/// Formats accepted for timestamps embedded in documents and rows.
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H%M%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp string. Accepts ISO-8601 with or without a zone
/// (zoned values are converted to UTC), the colon-free form used in file
/// names, and bare dates (midnight).
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    let without_zone = value.strip_suffix('Z').unwrap_or(value);
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(without_zone, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(without_zone, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Canonical textual form used in rows and collection members.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Output file name for a document: ISO instant without colons plus `.000Z`.
pub fn output_file_name(ts: &NaiveDateTime) -> String {
    format!("{}.000Z", ts.format("%Y-%m-%dT%H%M%S"))
}
