use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::analysis::scorer::{AnomalyScorer, ScorerFailure, ScorerOutput};
use crate::config::Config;
use crate::detect::{rule_bank, Category, DetectError, Detector, Flag};
use crate::events::{normalize, EventTable, RawRecord};
use crate::report::{DetectionReport, DetectorReport, DetectorStatus};

/// Normalizes a batch, runs every enabled detector and the scorer
/// concurrently, and merges their flags into a [`DetectionReport`].
///
/// The event table is shared read-only between tasks; each task returns
/// its own flags, so the merge below is the only join point.
pub struct Pipeline {
    config: Config,
    detectors: Vec<Arc<dyn Detector>>,
    scorer: Arc<AnomalyScorer>,
}

impl Pipeline {
    /// Build the default rule bank and scorer. Loads the classifier once
    /// when `scorer.classifier_path` is set.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let scorer = AnomalyScorer::from_config(&config.scorer).context("failed to build scorer")?;
        Ok(Self::with_scorer(config, scorer))
    }

    /// Use a caller-supplied scorer, e.g. with a different outlier model.
    pub fn with_scorer(config: Config, scorer: AnomalyScorer) -> Self {
        let detectors = rule_bank(&config);
        Self::with_detectors(config, detectors, scorer)
    }

    /// Use a caller-supplied detector bank and scorer.
    pub fn with_detectors(config: Config, detectors: Vec<Arc<dyn Detector>>, scorer: AnomalyScorer) -> Self {
        Self {
            config,
            detectors,
            scorer: Arc::new(scorer),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Normalize `records` and run detection over them.
    pub async fn run(&self, records: &[RawRecord]) -> DetectionReport {
        let table = normalize(records, &self.config.columns, self.config.window.bucket_secs);
        self.run_table(Arc::new(table)).await
    }

    /// Run detection over an already normalized table.
    pub async fn run_table(&self, table: Arc<EventTable>) -> DetectionReport {
        info!(events = table.len(), "Running detection");

        let mut statuses = Vec::with_capacity(self.detectors.len());
        let mut tasks: Vec<(usize, Category, JoinHandle<Vec<Flag>>)> = Vec::new();

        for detector in &self.detectors {
            let category = detector.category();
            // No rows means nothing to flag, not missing columns.
            if table.is_empty() {
                statuses.push(DetectorReport {
                    category,
                    status: DetectorStatus::Completed { flags: 0 },
                });
                continue;
            }
            match detector.check(&table) {
                Ok(()) => {
                    let detector = Arc::clone(detector);
                    let table = Arc::clone(&table);
                    let handle = tokio::task::spawn_blocking(move || detector.detect(&table));
                    tasks.push((statuses.len(), category, handle));
                    statuses.push(DetectorReport {
                        category,
                        status: DetectorStatus::Completed { flags: 0 },
                    });
                }
                Err(DetectError::MissingColumns { missing, .. }) => {
                    warn!(%category, ?missing, "detector disabled: required columns absent, coverage degraded");
                    statuses.push(DetectorReport {
                        category,
                        status: DetectorStatus::Disabled { missing },
                    });
                }
                Err(e) => {
                    error!(%category, error = %e, "detector could not start");
                    statuses.push(DetectorReport {
                        category,
                        status: DetectorStatus::Failed { error: e.to_string() },
                    });
                }
            }
        }

        let scorer = Arc::clone(&self.scorer);
        let scorer_table = Arc::clone(&table);
        let scoring = tokio::task::spawn_blocking(move || scorer.score(&scorer_table));

        let mut flags = Vec::new();
        for (idx, category, handle) in tasks {
            match handle.await {
                Ok(found) => {
                    info!(%category, flagged = found.len(), "detector finished");
                    statuses[idx].status = DetectorStatus::Completed { flags: found.len() };
                    flags.extend(found);
                }
                Err(e) => {
                    let err = DetectError::TaskFailed(e.to_string());
                    error!(%category, error = %err, "detector task failed");
                    statuses[idx].status = DetectorStatus::Failed { error: err.to_string() };
                }
            }
        }

        let scored = match scoring.await {
            Ok(out) => out,
            Err(e) => {
                error!(error = %e, "scorer task failed");
                ScorerOutput {
                    flags: Vec::new(),
                    failures: vec![ScorerFailure {
                        scorer: "scorer".to_string(),
                        schema_mismatch: false,
                        error: e.to_string(),
                    }],
                }
            }
        };
        flags.extend(scored.flags);

        let report = DetectionReport::build(&table, flags, statuses, scored.failures, &self.config.report);
        info!(
            flags = report.flags.len(),
            top = report.top.len(),
            degraded = report.is_degraded(),
            "Detection complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(values: Vec<serde_json::Value>) -> Vec<RawRecord> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_empty_input_is_empty_report() {
        let pipeline = Pipeline::new(Config::default()).unwrap();
        let report = pipeline.run(&[]).await;
        assert_eq!(report.events, 0);
        assert!(report.summary.is_empty());
        assert!(report.flags.is_empty());
        assert_eq!(report.detectors.len(), 4);
        assert!(report
            .detectors
            .iter()
            .all(|d| d.status == DetectorStatus::Completed { flags: 0 }));
        assert!(!report.is_degraded());
    }

    /// Panics on every table.
    struct Exploding;

    impl Detector for Exploding {
        fn category(&self) -> Category {
            Category::Ddos
        }

        fn requirement(&self) -> crate::detect::Requirement {
            crate::detect::Requirement::all(&[crate::events::Column::EntityKey])
        }

        fn detect(&self, _table: &EventTable) -> Vec<Flag> {
            panic!("detector blew up");
        }
    }

    #[tokio::test]
    async fn test_panicking_detector_fails_alone() {
        let config = Config::default();
        let detectors: Vec<Arc<dyn Detector>> = vec![
            Arc::new(crate::detect::volume::BruteForceDetector::new(&config.brute_force)),
            Arc::new(Exploding),
        ];
        let scorer = AnomalyScorer::from_config(&config.scorer).unwrap();
        let pipeline = Pipeline::with_detectors(config, detectors, scorer);

        let input = records(
            (0..11)
                .map(|i| {
                    json!({
                        "x_real_ip": "192.0.2.77",
                        "request_path": "/auth/login",
                        "start_time": format!("2024-05-01T08:30:{:02}Z", i),
                    })
                })
                .collect(),
        );
        let report = pipeline.run(&input).await;

        assert_eq!(report.detectors.len(), 2);
        assert_eq!(report.detectors[0].category, Category::BruteForce);
        assert_eq!(report.detectors[0].status, DetectorStatus::Completed { flags: 1 });
        match &report.detectors[1].status {
            DetectorStatus::Failed { error } => assert!(error.contains("detector task failed")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(report.flagged(Category::BruteForce).contains("192.0.2.77"));
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn test_missing_country_disables_geo_only() {
        let pipeline = Pipeline::new(Config::default()).unwrap();
        let input = records(
            (0..12)
                .map(|i| {
                    json!({
                        "x_real_ip": "10.0.0.9",
                        "dr_uid": "u1",
                        "request_path": "/login",
                        "user_agent": "Mozilla/5.0",
                        "duration": 1.0,
                        "start_time": format!("2024-05-01T10:00:{:02}Z", i),
                    })
                })
                .collect(),
        );

        let report = pipeline.run(&input).await;
        let geo = report
            .detectors
            .iter()
            .find(|d| d.category == Category::VpnGeoSwitch)
            .unwrap();
        assert_eq!(
            geo.status,
            DetectorStatus::Disabled {
                missing: vec![crate::events::Column::CountryCode]
            }
        );
        let brute = report
            .detectors
            .iter()
            .find(|d| d.category == Category::BruteForce)
            .unwrap();
        assert_eq!(brute.status, DetectorStatus::Completed { flags: 1 });
        assert!(report.flagged(Category::BruteForce).contains("10.0.0.9"));
        assert!(report.is_degraded());
    }
}
