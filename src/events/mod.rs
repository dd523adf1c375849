//! Normalized access-log events.
//!
//! Raw records arrive as loosely typed field maps. [`normalize`] turns them
//! into an [`EventTable`]: one typed [`Event`] per record plus the set of
//! logical columns the dataset actually carried.

pub mod normalize;

pub use normalize::normalize;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One source record, keyed by source column name.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Platform assigned when a record names none.
pub const DEFAULT_PLATFORM: &str = "web";

/// Logical event columns a detector can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Timestamp,
    EntityKey,
    UserKey,
    Path,
    UserAgent,
    Duration,
    Platform,
    CountryCode,
    VpnFlags,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Column::Timestamp => "timestamp",
            Column::EntityKey => "entity_key",
            Column::UserKey => "user_key",
            Column::Path => "path",
            Column::UserAgent => "user_agent",
            Column::Duration => "duration",
            Column::Platform => "platform",
            Column::CountryCode => "country_code",
            Column::VpnFlags => "vpn_flags",
        };
        f.write_str(name)
    }
}

/// A fixed-width, half-open time window `[start, start + width)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub width_secs: u32,
}

impl TimeBucket {
    /// The bucket of width `width_secs` that contains `ts`.
    pub fn containing(ts: DateTime<Utc>, width_secs: u32) -> Self {
        let width = i64::from(width_secs.max(1));
        let secs = ts.timestamp();
        let floored = secs - secs.rem_euclid(width);
        let start = DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(ts);
        Self {
            start,
            width_secs: width_secs.max(1),
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::seconds(i64::from(self.width_secs))
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end()
    }
}

/// A single normalized log line.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Index of the source record; evidence refers to events by it.
    pub row: usize,
    pub timestamp: Option<DateTime<Utc>>,
    pub bucket: Option<TimeBucket>,
    pub entity_key: String,
    pub user_key: Option<String>,
    pub path: Option<String>,
    pub user_agent: Option<String>,
    /// Seconds.
    pub duration: Option<f64>,
    pub platform: String,
    pub country_code: Option<String>,
    pub vpn_flags: Vec<String>,
}

/// The normalized dataset. Read-only once built.
#[derive(Debug, Clone)]
pub struct EventTable {
    events: Vec<Event>,
    columns: BTreeSet<Column>,
    bucket_secs: u32,
}

impl EventTable {
    pub fn new(events: Vec<Event>, columns: BTreeSet<Column>, bucket_secs: u32) -> Self {
        Self {
            events,
            columns,
            bucket_secs,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Event for a source row.
    pub fn get(&self, row: usize) -> Option<&Event> {
        self.events.get(row).filter(|e| e.row == row)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether at least one record carried a value for `column`.
    pub fn has(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    pub fn columns(&self) -> &BTreeSet<Column> {
        &self.columns
    }

    pub fn bucket_secs(&self) -> u32 {
        self.bucket_secs
    }
}
