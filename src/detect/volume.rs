//! Volumetric detectors: request counts per entity per time bucket.

use std::collections::BTreeMap;

use tracing::debug;

use crate::analysis::aggregator::{volumetric, BucketCount};
use crate::config::{BruteForceConfig, DdosConfig};
use crate::detect::{Category, Detector, Flag, Requirement};
use crate::events::{Column, Event, EventTable};

/// Flags entities hammering authentication endpoints.
pub struct BruteForceDetector {
    threshold: u64,
    keywords: Vec<String>,
}

impl BruteForceDetector {
    pub fn new(config: &BruteForceConfig) -> Self {
        Self {
            threshold: config.threshold,
            keywords: config
                .auth_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Whether the event hits an authentication path.
    pub fn matches(&self, event: &Event) -> bool {
        let Some(path) = event.path.as_deref() else {
            return false;
        };
        let path = path.to_lowercase();
        self.keywords.iter().any(|k| path.contains(k.as_str()))
    }
}

impl Detector for BruteForceDetector {
    fn category(&self) -> Category {
        Category::BruteForce
    }

    fn requirement(&self) -> Requirement {
        Requirement::all(&[Column::Timestamp, Column::EntityKey, Column::Path])
    }

    fn detect(&self, table: &EventTable) -> Vec<Flag> {
        let counts = volumetric(table, |e| self.matches(e));
        flag_hot_buckets(table, counts, self.threshold, Category::BruteForce, "authentication requests")
    }
}

/// Flags entities sending more requests per bucket than any client should.
pub struct DdosDetector {
    threshold: u64,
}

impl DdosDetector {
    pub fn new(config: &DdosConfig) -> Self {
        Self {
            threshold: config.threshold,
        }
    }
}

impl Detector for DdosDetector {
    fn category(&self) -> Category {
        Category::Ddos
    }

    fn requirement(&self) -> Requirement {
        Requirement::all(&[Column::Timestamp, Column::EntityKey])
    }

    fn detect(&self, table: &EventTable) -> Vec<Flag> {
        let counts = volumetric(table, |_| true);
        flag_hot_buckets(table, counts, self.threshold, Category::Ddos, "requests")
    }
}

/// One flag per entity with at least one bucket count above `threshold`.
/// Evidence is the rows of those buckets; score is the largest count.
fn flag_hot_buckets(
    table: &EventTable,
    counts: Vec<BucketCount>,
    threshold: u64,
    category: Category,
    noun: &str,
) -> Vec<Flag> {
    let mut hot: BTreeMap<String, (u64, usize, Vec<usize>)> = BTreeMap::new();
    for bc in counts.into_iter().filter(|bc| bc.count > threshold) {
        let entry = hot.entry(bc.entity_key).or_insert((0, 0, Vec::new()));
        entry.0 = entry.0.max(bc.count);
        entry.1 += 1;
        entry.2.extend(bc.rows);
    }

    debug!(%category, threshold, flagged = hot.len(), "volumetric scan done");

    hot.into_iter()
        .map(|(entity, (peak, buckets, rows))| {
            let reason = format!(
                "{} {} in one {}s window (limit {}, {} window{} over)",
                peak,
                noun,
                table.bucket_secs(),
                threshold,
                buckets,
                if buckets == 1 { "" } else { "s" },
            );
            Flag::new(table, entity, category, rows, peak as f64, reason)
        })
        .collect()
}
