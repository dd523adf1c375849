use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::{Column, Event, EventTable, RawRecord, TimeBucket, DEFAULT_PLATFORM};
use crate::config::ColumnMap;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

/// Type every raw record into an [`Event`].
///
/// Nothing here fails: unparsable timestamps become `None`, a missing
/// platform becomes [`DEFAULT_PLATFORM`], and missing optional fields stay
/// empty. Record order is preserved so `Event::row` is the record index.
pub fn normalize(records: &[RawRecord], columns: &ColumnMap, bucket_secs: u32) -> EventTable {
    let mut present = BTreeSet::new();
    let mut events = Vec::with_capacity(records.len());
    let mut bad_timestamps = 0usize;

    for (row, record) in records.iter().enumerate() {
        let raw_ts = field(record, &columns.timestamp);
        let timestamp = raw_ts.and_then(parse_timestamp);
        if raw_ts.is_some() {
            present.insert(Column::Timestamp);
            if timestamp.is_none() {
                bad_timestamps += 1;
            }
        }

        let entity_key = text(record, &columns.entity_key);
        let user_key = text(record, &columns.user_key);
        let path = text(record, &columns.path);
        let user_agent = text(record, &columns.user_agent);
        let duration = field(record, &columns.duration).and_then(parse_duration);
        let platform = text(record, &columns.platform);
        let country_code = text(record, &columns.country_code);
        let vpn_flags = field(record, &columns.vpn_flags)
            .map(parse_flags)
            .unwrap_or_default();

        for (column, seen) in [
            (Column::EntityKey, entity_key.is_some()),
            (Column::UserKey, user_key.is_some()),
            (Column::Path, path.is_some()),
            (Column::UserAgent, user_agent.is_some()),
            (Column::Duration, duration.is_some()),
            (Column::Platform, platform.is_some()),
            (Column::CountryCode, country_code.is_some()),
            (Column::VpnFlags, field(record, &columns.vpn_flags).is_some()),
        ] {
            if seen {
                present.insert(column);
            }
        }

        events.push(Event {
            row,
            timestamp,
            bucket: timestamp.map(|ts| TimeBucket::containing(ts, bucket_secs)),
            entity_key: entity_key.unwrap_or_default(),
            user_key,
            path,
            user_agent,
            duration,
            platform: platform.unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
            country_code,
            vpn_flags,
        });
    }

    if bad_timestamps > 0 {
        debug!(bad_timestamps, "timestamps could not be parsed; excluded from windowed detectors");
    }
    info!(
        events = events.len(),
        columns = ?present,
        bad_timestamps,
        "normalized events"
    );

    EventTable::new(events, present, bucket_secs)
}

/// A non-null value for `name`.
fn field<'a>(record: &'a RawRecord, name: &str) -> Option<&'a Value> {
    record.get(name).filter(|v| !v.is_null())
}

/// A trimmed, non-blank string for `name`. Scalars are stringified.
fn text(record: &RawRecord, name: &str) -> Option<String> {
    let value = field(record, name)?;
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    (!s.is_empty()).then_some(s)
}

pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::String(s) => parse_timestamp_str(s.trim()),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    s.parse::<f64>().ok().and_then(from_epoch)
}

fn from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos)
}

fn parse_duration(value: &Value) -> Option<f64> {
    let secs = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    secs.is_finite().then_some(secs)
}

fn parse_flags(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(|c: char| c == ',' || c == ';' || c == '|' || c.is_whitespace())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Bool(true) => vec!["true".to_string()],
        _ => Vec::new(),
    }
}
