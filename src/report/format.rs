//! Plain-text rendering of a detection report.

use std::fmt;

use super::{DetectionReport, DetectorStatus};

/// Human-readable report for the terminal.
pub fn render_text(report: &DetectionReport) -> String {
    report.to_string()
}

impl fmt::Display for DetectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== attackscope detection report ===")?;
        writeln!(f, "Run:    {}", self.run_id)?;
        writeln!(f, "Events: {}", self.events)?;

        writeln!(f, "\nDetectors:")?;
        for d in &self.detectors {
            let status = match &d.status {
                DetectorStatus::Completed { flags } => format!("ok, {} flagged", flags),
                DetectorStatus::Disabled { missing } => {
                    let cols: Vec<String> = missing.iter().map(|c| c.to_string()).collect();
                    format!("DISABLED (missing {})", cols.join(", "))
                }
                DetectorStatus::Failed { error } => format!("FAILED ({})", error),
            };
            writeln!(f, " - {:<20} {}", d.category.label(), status)?;
        }
        for failure in &self.scorer_failures {
            let kind = if failure.schema_mismatch { "SCHEMA MISMATCH" } else { "FAILED" };
            writeln!(f, " - {:<20} {} ({})", failure.scorer, kind, failure.error)?;
        }

        writeln!(f, "\nAttack summary by platform:")?;
        if self.summary.is_empty() {
            writeln!(f, "No suspicious activity found.")?;
        } else {
            writeln!(f, "{:<20} | {:<10} | {:>8} | {:>8}", "Attack", "Platform", "Entities", "Requests")?;
            writeln!(f, "{:-<20}-|-{:-<10}-|-{:-<8}-|-{:-<8}", "", "", "", "")?;
            for row in &self.summary.rows {
                writeln!(
                    f,
                    "{:<20} | {:<10} | {:>8} | {:>8}",
                    row.category.label(),
                    row.platform,
                    row.entities,
                    row.requests
                )?;
            }
        }

        if !self.top.is_empty() {
            writeln!(f, "\nTop suspicious entities:")?;
            for r in &self.top {
                writeln!(
                    f,
                    "{:>3}. {:<24} {:<20} score {:>8} | {}",
                    r.rank,
                    r.entity_key,
                    r.category.label(),
                    format_score(r.score),
                    r.justification
                )?;
            }
        }

        for table in &self.evidence {
            writeln!(
                f,
                "\n{} evidence ({} of {} rows):",
                table.category.label(),
                table.rows.len(),
                table.total_rows
            )?;
            let header: Vec<String> = table.columns.iter().map(|c| c.to_string()).collect();
            writeln!(f, "  {}", header.join(" | "))?;
            for row in &table.rows {
                writeln!(f, "  {}", row.join(" | "))?;
            }
        }
        Ok(())
    }
}

/// Context handed to the ask backend: the summary as CSV plus the ranked
/// entities.
pub fn dataset_summary(report: &DetectionReport) -> String {
    let mut out = report.summary.to_csv();
    if !report.top.is_empty() {
        out.push_str("\nrank,entity,category,score,justification\n");
        for r in &report.top {
            out.push_str(&format!(
                "{},{},{},{},\"{}\"\n",
                r.rank,
                r.entity_key,
                r.category,
                format_score(r.score),
                r.justification.replace('"', "'")
            ));
        }
    }
    out
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{:.0}", score)
    } else {
        format!("{:.3}", score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColumnMap, ReportConfig};
    use crate::detect::{Category, Flag};
    use crate::events::{normalize, Column};
    use crate::report::DetectorReport;
    use serde_json::json;

    fn report() -> DetectionReport {
        let records: Vec<_> = (0..3)
            .map(|i| {
                json!({ "x_real_ip": "6.6.6.6", "user_agent": "scrapy", "start_time": format!("2024-05-01T10:00:0{}Z", i) })
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();
        let table = normalize(&records, &ColumnMap::default(), 60);
        let flags = vec![Flag::new(&table, "6.6.6.6", Category::BotLike, vec![0, 1, 2], 3.0, "3 bot-like requests")];
        DetectionReport::build(
            &table,
            flags,
            vec![
                DetectorReport {
                    category: Category::BotLike,
                    status: DetectorStatus::Completed { flags: 1 },
                },
                DetectorReport {
                    category: Category::VpnGeoSwitch,
                    status: DetectorStatus::Disabled {
                        missing: vec![Column::UserKey, Column::CountryCode],
                    },
                },
            ],
            Vec::new(),
            &ReportConfig::default(),
        )
    }

    #[test]
    fn test_render_text() {
        let report = report();
        let text = render_text(&report);
        assert_eq!(text, format!("{}", report));
        assert!(text.contains("Events: 3"));
        assert!(text.contains("DISABLED (missing user_key, country_code)"));
        assert!(text.contains("Bot-like"));
        assert!(text.contains("6.6.6.6"));
        assert!(text.contains("3 bot-like requests"));
        assert!(text.contains("Bot-like evidence (3 of 3 rows)"));
    }

    #[test]
    fn test_render_empty() {
        let table = normalize(&[], &ColumnMap::default(), 60);
        let report = DetectionReport::build(&table, Vec::new(), Vec::new(), Vec::new(), &ReportConfig::default());
        assert!(render_text(&report).contains("No suspicious activity found."));
    }

    #[test]
    fn test_dataset_summary() {
        let summary = dataset_summary(&report());
        assert!(summary.starts_with("attack_type,platform,entities,suspicious_requests\n"));
        assert!(summary.contains("Bot-like,web,1,3"));
        assert!(summary.contains("1,6.6.6.6,Bot-like,3,\"3 bot-like requests\""));
    }
}
