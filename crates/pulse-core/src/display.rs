// ── Display formatting ──
//
// Text renderings shared by every front end. Unknown values get fixed
// placeholders so columns stay aligned: `--` for battery, `--.------`
// for coordinates, `--:--` for time.

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::model::DeviceRecord;

pub const BATTERY_PLACEHOLDER: &str = "--";
pub const COORDINATE_PLACEHOLDER: &str = "--.------";
pub const TIME_PLACEHOLDER: &str = "--:--";

/// `"85%"`, or `"--"` when unknown.
pub fn battery(percent: Option<u8>) -> String {
    percent.map_or_else(|| BATTERY_PLACEHOLDER.to_owned(), |b| format!("{b}%"))
}

/// Six decimals, or `"--.------"` when unknown.
pub fn coordinate(value: Option<f64>) -> String {
    value.map_or_else(|| COORDINATE_PLACEHOLDER.to_owned(), |v| format!("{v:.6}"))
}

/// `"19.432600, -99.133200"`, or placeholders when there is no fix.
pub fn position(record: &DeviceRecord) -> String {
    match record.fix() {
        Some(fix) => format!("{:.6}, {:.6}", fix.latitude, fix.longitude),
        None => format!("{COORDINATE_PLACEHOLDER}, {COORDINATE_PLACEHOLDER}"),
    }
}

/// Last update as local `HH:MM:SS`, or `"--:--"`.
pub fn updated_at(epoch_ms: Option<i64>) -> String {
    updated_at_in(epoch_ms, &Local)
}

/// Last update as `HH:MM:SS` in `tz`, or `"--:--"`.
pub fn updated_at_in<Tz>(epoch_ms: Option<i64>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    epoch_ms
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(
            || TIME_PLACEHOLDER.to_owned(),
            |t| t.with_timezone(tz).format("%H:%M:%S").to_string(),
        )
}

/// Full timestamp for detail views, in UTC RFC 3339.
pub fn updated_at_rfc3339(epoch_ms: Option<i64>) -> Option<String> {
    epoch_ms
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

/// Current time as epoch milliseconds, for stamping writes.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
