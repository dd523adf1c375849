use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::analysis::ScoreError;
use crate::events::{Event, EventTable, TimeBucket};

/// Column order of [`EntityAggregate::to_vector`].
pub const FEATURE_NAMES: [&str; 7] = [
    "request_count",
    "unique_countries",
    "unique_devices",
    "total_duration",
    "distinct_user_agents",
    "distinct_paths",
    "vpn_flag_count",
];

/// Request count for one entity inside one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketCount {
    pub entity_key: String,
    pub bucket: TimeBucket,
    pub count: u64,
    #[serde(skip)]
    pub rows: Vec<usize>,
}

/// Requests seen on one calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u64,
    #[serde(skip)]
    pub rows: Vec<usize>,
}

/// Which key entity-mode aggregation groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKeyKind {
    Entity,
    User,
}

impl EntityKeyKind {
    fn key<'a>(&self, event: &'a Event) -> Option<&'a str> {
        match self {
            EntityKeyKind::Entity => Some(event.entity_key.as_str()).filter(|k| !k.is_empty()),
            EntityKeyKind::User => event.user_key.as_deref(),
        }
    }
}

/// Whole-window feature row for one entity. Every feature is always set;
/// a column missing from the source contributes zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityAggregate {
    pub key: String,
    pub request_count: u64,
    pub unique_countries: u64,
    /// Distinct platforms.
    pub unique_devices: u64,
    /// Seconds.
    pub total_duration: f64,
    pub distinct_user_agents: u64,
    pub distinct_paths: u64,
    /// Requests carrying at least one VPN flag.
    pub vpn_flag_count: u64,
    #[serde(skip)]
    pub rows: Vec<usize>,
}

impl EntityAggregate {
    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            self.request_count as f64,
            self.unique_countries as f64,
            self.unique_devices as f64,
            self.total_duration,
            self.distinct_user_agents as f64,
            self.distinct_paths as f64,
            self.vpn_flag_count as f64,
        ]
    }

    pub fn feature(&self, name: &str) -> Option<f64> {
        let idx = FEATURE_NAMES.iter().position(|f| *f == name)?;
        self.to_vector().get(idx).copied()
    }
}

/// Dense per-entity feature table.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateTable {
    pub kind: EntityKeyKind,
    pub rows: Vec<EntityAggregate>,
}

impl AggregateTable {
    pub fn schema(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Feature names from `names` the table does not provide.
    pub fn missing(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|n| !FEATURE_NAMES.contains(&n.as_str()))
            .cloned()
            .collect()
    }

    /// One row per entity, columns in the order of `names`.
    pub fn matrix(&self, names: &[String]) -> Result<Vec<Vec<f64>>, ScoreError> {
        let missing = self.missing(names);
        if !missing.is_empty() {
            return Err(ScoreError::SchemaMismatch {
                expected: names.to_vec(),
                missing,
            });
        }
        Ok(self
            .rows
            .iter()
            .map(|agg| {
                names
                    .iter()
                    .map(|n| agg.feature(n).unwrap_or(0.0))
                    .collect()
            })
            .collect())
    }
}

/// Volumetric mode: count events per `(entity, bucket)` for events that
/// pass `filter`. Events without a bucket are skipped. Sorted by entity,
/// then bucket start.
pub fn volumetric<F>(table: &EventTable, filter: F) -> Vec<BucketCount>
where
    F: Fn(&Event) -> bool,
{
    let mut groups: BTreeMap<(&str, TimeBucket), Vec<usize>> = BTreeMap::new();
    for event in table.events() {
        let Some(bucket) = event.bucket else { continue };
        if event.entity_key.is_empty() || !filter(event) {
            continue;
        }
        groups
            .entry((event.entity_key.as_str(), bucket))
            .or_default()
            .push(event.row);
    }

    groups
        .into_iter()
        .map(|((entity, bucket), rows)| BucketCount {
            entity_key: entity.to_string(),
            bucket,
            count: rows.len() as u64,
            rows,
        })
        .collect()
}

#[derive(Default)]
struct Accum<'a> {
    rows: Vec<usize>,
    countries: BTreeSet<&'a str>,
    platforms: BTreeSet<&'a str>,
    agents: BTreeSet<&'a str>,
    paths: BTreeSet<&'a str>,
    duration: f64,
    vpn: u64,
}

/// Entity mode: one dense [`EntityAggregate`] per key across the whole
/// input, sorted by key.
pub fn entity_table(table: &EventTable, kind: EntityKeyKind) -> AggregateTable {
    let mut groups: BTreeMap<&str, Accum> = BTreeMap::new();
    for event in table.events() {
        let Some(key) = kind.key(event) else { continue };
        let acc = groups.entry(key).or_default();
        acc.rows.push(event.row);
        acc.platforms.insert(event.platform.as_str());
        if let Some(c) = event.country_code.as_deref() {
            acc.countries.insert(c);
        }
        if let Some(ua) = event.user_agent.as_deref() {
            acc.agents.insert(ua);
        }
        if let Some(p) = event.path.as_deref() {
            acc.paths.insert(p);
        }
        acc.duration += event.duration.unwrap_or(0.0);
        if !event.vpn_flags.is_empty() {
            acc.vpn += 1;
        }
    }

    let rows = groups
        .into_iter()
        .map(|(key, acc)| EntityAggregate {
            key: key.to_string(),
            request_count: acc.rows.len() as u64,
            unique_countries: acc.countries.len() as u64,
            unique_devices: acc.platforms.len() as u64,
            total_duration: acc.duration,
            distinct_user_agents: acc.agents.len() as u64,
            distinct_paths: acc.paths.len() as u64,
            vpn_flag_count: acc.vpn,
            rows: acc.rows,
        })
        .collect();

    AggregateTable { kind, rows }
}

/// Requests per UTC calendar day, sorted by date.
pub fn daily_counts(table: &EventTable) -> Vec<DailyCount> {
    let mut days: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for event in table.events() {
        if let Some(ts) = event.timestamp {
            days.entry(ts.date_naive()).or_default().push(event.row);
        }
    }
    days.into_iter()
        .map(|(date, rows)| DailyCount {
            date,
            count: rows.len() as u64,
            rows,
        })
        .collect()
}
