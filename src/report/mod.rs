//! Merging detector and scorer output into one report.
//!
//! Flags stay separate per category in the summary (an entity can count as
//! both "Brute Force" and "Bot-like"); only the ranked list deduplicates by
//! entity.

pub mod evidence;
pub mod format;
pub mod rank;

pub use evidence::EvidenceTable;
pub use rank::RankedEntity;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::scorer::ScorerFailure;
use crate::config::ReportConfig;
use crate::detect::{Category, Flag};
use crate::events::{Column, EventTable};

/// How a rule detector fared in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DetectorStatus {
    Completed { flags: usize },
    Disabled { missing: Vec<Column> },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorReport {
    pub category: Category,
    pub status: DetectorStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub category: Category,
    pub platform: String,
    /// Distinct flagged entities with evidence on this platform.
    pub entities: usize,
    /// Distinct evidence rows on this platform.
    pub requests: usize,
}

/// Flag counts by category and platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub rows: Vec<SummaryRow>,
}

impl DetectionSummary {
    pub fn from_flags(flags: &[Flag], table: &EventTable) -> Self {
        let mut groups: BTreeMap<(Category, &str), (BTreeSet<&str>, BTreeSet<usize>)> = BTreeMap::new();
        for flag in flags {
            for &row in &flag.evidence {
                let Some(event) = table.get(row) else { continue };
                let group = groups.entry((flag.category, event.platform.as_str())).or_default();
                group.0.insert(flag.entity_key.as_str());
                group.1.insert(row);
            }
        }

        Self {
            rows: groups
                .into_iter()
                .map(|((category, platform), (entities, rows))| SummaryRow {
                    category,
                    platform: platform.to_string(),
                    entities: entities.len(),
                    requests: rows.len(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows for one category.
    pub fn for_category(&self, category: Category) -> impl Iterator<Item = &SummaryRow> {
        self.rows.iter().filter(move |r| r.category == category)
    }

    /// CSV rendering, one line per category and platform.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("attack_type,platform,entities,suspicious_requests\n");
        for row in &self.rows {
            out.push_str(&format!(
                "{},{},{},{}\n",
                row.category, row.platform, row.entities, row.requests
            ));
        }
        out
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub events: usize,
    pub summary: DetectionSummary,
    pub top: Vec<RankedEntity>,
    pub evidence: Vec<EvidenceTable>,
    pub detectors: Vec<DetectorReport>,
    pub scorer_failures: Vec<ScorerFailure>,
    pub flags: Vec<Flag>,
}

impl DetectionReport {
    pub fn build(
        table: &EventTable,
        mut flags: Vec<Flag>,
        detectors: Vec<DetectorReport>,
        scorer_failures: Vec<ScorerFailure>,
        config: &ReportConfig,
    ) -> Self {
        flags.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.entity_key.cmp(&b.entity_key))
        });

        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            events: table.len(),
            summary: DetectionSummary::from_flags(&flags, table),
            top: rank::rank(&flags, config.top_n),
            evidence: evidence::evidence_tables(&flags, table, config.evidence_rows),
            detectors,
            scorer_failures,
            flags,
        }
    }

    pub fn flags_for(&self, category: Category) -> impl Iterator<Item = &Flag> {
        self.flags.iter().filter(move |f| f.category == category)
    }

    /// Entities flagged by `category`.
    pub fn flagged(&self, category: Category) -> BTreeSet<&str> {
        self.flags_for(category).map(|f| f.entity_key.as_str()).collect()
    }

    /// Some detector or scorer could not run, so coverage is partial.
    pub fn is_degraded(&self) -> bool {
        !self.scorer_failures.is_empty()
            || self
                .detectors
                .iter()
                .any(|d| !matches!(d.status, DetectorStatus::Completed { .. }))
    }

    pub fn schema_mismatch(&self) -> bool {
        self.scorer_failures.iter().any(|f| f.schema_mismatch)
    }
}
