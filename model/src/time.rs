use crate::errors::ModelError;
use chrono::{DateTime, SecondsFormat, Utc};

/// Formats `t` as RFC3339 in UTC with as many fractional digits as needed,
/// dropping the fraction entirely for whole seconds.
pub fn format_rfc3339_nano(t: DateTime<Utc>) -> String {
    let full = t.to_rfc3339_opts(SecondsFormat::Nanos, true);
    let Some((head, fraction)) = full.trim_end_matches('Z').split_once('.') else {
        return full;
    };
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{head}Z")
    } else {
        format!("{head}.{fraction}Z")
    }
}

pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, ModelError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ModelError::InvalidTimestamp(s.to_string()))
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, ModelError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| ModelError::InvalidTimestamp(ms.to_string()))
}

/// Parses a broker `SentTimestamp` attribute (milliseconds since the epoch).
pub fn parse_millis(s: &str) -> Result<DateTime<Utc>, ModelError> {
    let ms = s
        .trim()
        .parse::<i64>()
        .map_err(|_| ModelError::InvalidTimestamp(s.to_string()))?;
    from_millis(ms)
}

pub fn now_rfc3339_nano() -> String {
    format_rfc3339_nano(Utc::now())
}
