//! Date-time coercion

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// How integer values in date-time fields are read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegerDatetimeMode {
    /// Integers are not date-times
    #[default]
    NoIntegerDatetimeParsing,
    /// Integers are seconds since the Unix epoch
    UnixSecondsIntegerDatetimeParsing,
    /// Integers are milliseconds since the Unix epoch
    UnixMillisecondsIntegerDatetimeParsing,
}

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const NAIVE_DATETIME_FORMATS: [&str; 12] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: [&str; 9] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%Y%m%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%b %d %Y",
];

/// Parse a date-time in any of the common textual forms
///
/// Values without an offset are taken as UTC. A bare date is midnight UTC.
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(text, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc2822(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    let naive_text = text
        .strip_suffix('Z')
        .or_else(|| text.strip_suffix(" UTC"))
        .unwrap_or(text)
        .trim_end();
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(naive_text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(naive_text, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Render a UTC date-time with microsecond precision
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Render a UTC date-time the way bookmarks store it
pub fn format_bookmark(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Coerce a JSON value into a formatted date-time
pub(crate) fn coerce_datetime(value: &Value, mode: IntegerDatetimeMode) -> Option<String> {
    if let Some(parsed) = integer_datetime(value, mode) {
        return Some(format_datetime(&parsed));
    }
    match value {
        Value::String(text) => {
            let parsed = parse_datetime(text);
            if parsed.is_none() {
                debug!(value = %text, "Value is not a date-time");
            }
            parsed.map(|dt| format_datetime(&dt))
        }
        _ => None,
    }
}

fn integer_datetime(value: &Value, mode: IntegerDatetimeMode) -> Option<DateTime<Utc>> {
    match mode {
        IntegerDatetimeMode::NoIntegerDatetimeParsing => None,
        IntegerDatetimeMode::UnixSecondsIntegerDatetimeParsing => {
            let seconds = match value {
                Value::Number(n) => n.as_i64()?,
                Value::String(s) => s.trim().parse::<i64>().ok()?,
                _ => return None,
            };
            DateTime::from_timestamp(seconds, 0)
        }
        IntegerDatetimeMode::UnixMillisecondsIntegerDatetimeParsing => {
            let millis = match value {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => s.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            if !millis.is_finite() {
                return None;
            }
            let micros = (millis * 1000.0).round();
            DateTime::from_timestamp_micros(micros as i64)
        }
    }
}
