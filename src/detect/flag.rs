use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::Category;
use crate::events::EventTable;

/// One detector's suspicion about one entity. Never merged with flags from
/// other detectors; merging happens in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flag {
    pub entity_key: String,
    pub category: Category,
    /// Source rows backing the flag, ascending.
    pub evidence: Vec<usize>,
    pub score: f64,
    /// Timestamp of the most recent evidence event.
    pub emitted_at: Option<DateTime<Utc>>,
    /// Human-readable justification.
    pub reason: String,
}

impl Flag {
    /// Build a flag, keeping only evidence rows that exist in `table`.
    pub fn new(
        table: &EventTable,
        entity_key: impl Into<String>,
        category: Category,
        mut evidence: Vec<usize>,
        score: f64,
        reason: impl Into<String>,
    ) -> Self {
        evidence.sort_unstable();
        evidence.dedup();
        evidence.retain(|&row| table.get(row).is_some());
        let emitted_at = evidence
            .iter()
            .filter_map(|&row| table.get(row).and_then(|e| e.timestamp))
            .max();

        Self {
            entity_key: entity_key.into(),
            category,
            evidence,
            score,
            emitted_at,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnMap;
    use crate::events::normalize;
    use serde_json::json;

    #[test]
    fn test_flag_tracks_latest_evidence() {
        let records: Vec<_> = [
            json!({ "x_real_ip": "a", "start_time": "2024-05-01T10:00:00Z" }),
            json!({ "x_real_ip": "a", "start_time": "2024-05-01T11:00:00Z" }),
            json!({ "x_real_ip": "a", "start_time": "bad" }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();
        let table = normalize(&records, &ColumnMap::default(), 60);

        let flag = Flag::new(&table, "a", Category::Ddos, vec![2, 0, 1, 1, 99], 3.0, "test");
        assert_eq!(flag.evidence, vec![0, 1, 2]);
        assert_eq!(flag.emitted_at, table.events()[1].timestamp);
    }
}
