use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::detect::{Category, Flag};
use crate::events::{Column, Event, EventTable};

/// The flagged rows of one category, projected to the columns an operator
/// reviews for that kind of attack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceTable {
    pub category: Category,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
    /// Evidence rows before truncation.
    pub total_rows: usize,
}

pub fn columns_for(category: Category) -> &'static [Column] {
    match category {
        Category::BruteForce => &[Column::Timestamp, Column::EntityKey, Column::Path, Column::UserKey],
        Category::VpnGeoSwitch => &[
            Column::Timestamp,
            Column::CountryCode,
            Column::UserKey,
            Column::EntityKey,
        ],
        Category::BotLike => &[
            Column::Timestamp,
            Column::UserAgent,
            Column::EntityKey,
            Column::Duration,
        ],
        Category::Ddos => &[Column::Timestamp, Column::EntityKey, Column::Path],
        Category::BehavioralOutlier
        | Category::VolumeSpike
        | Category::BurstAttempts
        | Category::Classifier => &[Column::Timestamp, Column::EntityKey, Column::UserKey, Column::Path],
    }
}

/// One table per category that has flags, rows in source order, at most
/// `limit` rows each.
pub fn evidence_tables(flags: &[Flag], table: &EventTable, limit: usize) -> Vec<EvidenceTable> {
    let mut by_category: BTreeMap<Category, BTreeSet<usize>> = BTreeMap::new();
    for flag in flags {
        by_category
            .entry(flag.category)
            .or_default()
            .extend(flag.evidence.iter().copied());
    }

    by_category
        .into_iter()
        .map(|(category, rows)| {
            let columns = columns_for(category).to_vec();
            let projected = rows
                .iter()
                .filter_map(|&row| table.get(row))
                .take(limit)
                .map(|event| columns.iter().map(|&c| cell(event, c)).collect())
                .collect();
            EvidenceTable {
                category,
                columns,
                rows: projected,
                total_rows: rows.len(),
            }
        })
        .collect()
}

/// Display value of one event column. Missing values render empty.
pub fn cell(event: &Event, column: Column) -> String {
    match column {
        Column::Timestamp => event
            .timestamp
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        Column::EntityKey => event.entity_key.clone(),
        Column::UserKey => event.user_key.clone().unwrap_or_default(),
        Column::Path => event.path.clone().unwrap_or_default(),
        Column::UserAgent => event.user_agent.clone().unwrap_or_default(),
        Column::Duration => event.duration.map(|d| format!("{:.3}", d)).unwrap_or_default(),
        Column::Platform => event.platform.clone(),
        Column::CountryCode => event.country_code.clone().unwrap_or_default(),
        Column::VpnFlags => event.vpn_flags.join(","),
    }
}
