use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::analysis::aggregator::{
    daily_counts, entity_table, volumetric, AggregateTable, EntityKeyKind, FEATURE_NAMES,
};
use crate::analysis::isolation::IsolationForest;
use crate::analysis::model::LogisticClassifier;
use crate::analysis::stats::Series;
use crate::analysis::{Classifier, OutlierModel, OutlierOutput, ScoreError};
use crate::config::ScorerConfig;
use crate::detect::{Category, Flag};
use crate::events::EventTable;

/// Fewer rows than this give an outlier model nothing to compare against.
const MIN_ROWS: usize = 2;

/// A scoring target that could not produce results for this run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorerFailure {
    pub scorer: String,
    pub schema_mismatch: bool,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ScorerOutput {
    pub flags: Vec<Flag>,
    pub failures: Vec<ScorerFailure>,
}

/// Statistical and model-based scoring over aggregated features.
///
/// Outlier labels (`-1`/`1`) and classifier labels (`1`/`0`) both end up as
/// plain [`Flag`]s, so nothing downstream knows which produced a flag.
pub struct AnomalyScorer {
    outlier: Arc<dyn OutlierModel>,
    classifier: Option<Arc<dyn Classifier>>,
    contamination: f64,
    burst_contamination: f64,
}

impl AnomalyScorer {
    pub fn new(outlier: Arc<dyn OutlierModel>, config: &ScorerConfig) -> Self {
        Self {
            outlier,
            classifier: None,
            contamination: config.contamination,
            burst_contamination: config.burst_contamination,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Isolation forest plus, when `classifier_path` is set, the pretrained
    /// classifier it points at.
    pub fn from_config(config: &ScorerConfig) -> Result<Self, ScoreError> {
        let scorer = Self::new(Arc::new(IsolationForest::from_config(config)), config);
        match &config.classifier_path {
            Some(path) => Ok(scorer.with_classifier(Arc::new(LogisticClassifier::load(path)?))),
            None => Ok(scorer),
        }
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    /// Run every scoring target. A failing target is reported in
    /// [`ScorerOutput::failures`] and does not stop the others.
    pub fn score(&self, table: &EventTable) -> ScorerOutput {
        let mut out = ScorerOutput::default();
        let entities = entity_table(table, EntityKeyKind::Entity);

        record(&mut out, "behavioral_outlier", self.behavioral(table, &entities));
        record(&mut out, "volume_spike", self.volume_spikes(table));
        record(&mut out, "burst_attempts", self.bursts(table));
        if let Some(classifier) = &self.classifier {
            let name = format!("classifier:{}", classifier.name());
            record(&mut out, &name, classify(table, &entities, classifier.as_ref()));
        }
        out
    }

    fn fit(&self, matrix: &[Vec<f64>], contamination: f64) -> Result<OutlierOutput, ScoreError> {
        let out = self.outlier.fit_predict(matrix, contamination)?;
        if out.labels.len() != matrix.len() {
            return Err(ScoreError::PredictionCount {
                expected: matrix.len(),
                got: out.labels.len(),
            });
        }
        if out.scores.len() != matrix.len() {
            return Err(ScoreError::InvalidModel(format!(
                "{} returned {} scores for {} rows",
                self.outlier.name(),
                out.scores.len(),
                matrix.len()
            )));
        }
        Ok(out)
    }

    /// Entities whose whole feature vector is atypical.
    fn behavioral(&self, table: &EventTable, entities: &AggregateTable) -> Result<Vec<Flag>, ScoreError> {
        if entities.len() < MIN_ROWS {
            return Ok(Vec::new());
        }
        let names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        let matrix = entities.matrix(&names)?;
        let out = self.fit(&matrix, self.contamination)?;

        let columns: Vec<Series> = (0..names.len())
            .map(|j| Series::new(matrix.iter().map(|row| row[j]).collect()))
            .collect();

        Ok(entities
            .rows
            .iter()
            .enumerate()
            .filter(|(i, _)| out.is_outlier(*i))
            .map(|(i, agg)| {
                let reason = match most_deviant(&columns, &matrix[i]) {
                    Some(j) => format!(
                        "unusual {} ({} vs mean {:.1})",
                        names[j],
                        trim_float(matrix[i][j]),
                        columns[j].mean()
                    ),
                    None => "unusual activity profile".to_string(),
                };
                Flag::new(
                    table,
                    agg.key.clone(),
                    Category::BehavioralOutlier,
                    agg.rows.clone(),
                    out.scores[i],
                    reason,
                )
            })
            .collect())
    }

    /// Days with request volume far above the others.
    fn volume_spikes(&self, table: &EventTable) -> Result<Vec<Flag>, ScoreError> {
        let days = daily_counts(table);
        if days.len() < MIN_ROWS {
            return Ok(Vec::new());
        }
        let matrix: Vec<Vec<f64>> = days.iter().map(|d| vec![d.count as f64]).collect();
        let out = self.fit(&matrix, self.contamination)?;
        let mean = Series::new(matrix.iter().map(|r| r[0]).collect()).mean();

        Ok(days
            .into_iter()
            .enumerate()
            .filter(|(i, d)| out.is_outlier(*i) && d.count as f64 > mean)
            .map(|(i, d)| {
                let reason = format!("{} requests on {} (daily mean {:.1})", d.count, d.date, mean);
                Flag::new(table, d.date.to_string(), Category::VolumeSpike, d.rows, out.scores[i], reason)
            })
            .collect())
    }

    /// Entities with a single time bucket far busier than typical buckets.
    fn bursts(&self, table: &EventTable) -> Result<Vec<Flag>, ScoreError> {
        let buckets = volumetric(table, |_| true);
        if buckets.len() < MIN_ROWS {
            return Ok(Vec::new());
        }
        let matrix: Vec<Vec<f64>> = buckets.iter().map(|b| vec![b.count as f64]).collect();
        let out = self.fit(&matrix, self.burst_contamination)?;
        let mean = Series::new(matrix.iter().map(|r| r[0]).collect()).mean();

        let mut per_entity: BTreeMap<String, (u64, Vec<usize>)> = BTreeMap::new();
        for (i, bucket) in buckets.into_iter().enumerate() {
            if !out.is_outlier(i) || bucket.count as f64 <= mean {
                continue;
            }
            let entry = per_entity.entry(bucket.entity_key).or_default();
            entry.0 = entry.0.max(bucket.count);
            entry.1.extend(bucket.rows);
        }

        Ok(per_entity
            .into_iter()
            .map(|(entity, (peak, rows))| {
                let reason = format!(
                    "{} requests in one {}s window (typical window {:.1})",
                    peak,
                    table.bucket_secs(),
                    mean
                );
                Flag::new(table, entity, Category::BurstAttempts, rows, peak as f64, reason)
            })
            .collect())
    }
}

fn classify(
    table: &EventTable,
    entities: &AggregateTable,
    classifier: &dyn Classifier,
) -> Result<Vec<Flag>, ScoreError> {
    let names = classifier.feature_names().to_vec();
    let missing = entities.missing(&names);
    if !missing.is_empty() {
        return Err(ScoreError::SchemaMismatch {
            expected: names,
            missing,
        });
    }
    if entities.is_empty() {
        return Ok(Vec::new());
    }

    let matrix = entities.matrix(&names)?;
    let labels = classifier.predict(&matrix)?;
    if labels.len() != matrix.len() {
        return Err(ScoreError::PredictionCount {
            expected: matrix.len(),
            got: labels.len(),
        });
    }
    let scores = classifier
        .scores(&matrix)
        .filter(|s| s.len() == matrix.len());
    let reason = justification(classifier);

    Ok(entities
        .rows
        .iter()
        .enumerate()
        .filter(|(i, _)| labels[*i] == 1)
        .map(|(i, agg)| {
            let score = scores.as_ref().map_or(1.0, |s| s[i]);
            Flag::new(table, agg.key.clone(), Category::Classifier, agg.rows.clone(), score, reason.clone())
        })
        .collect())
}

/// "High X usage" for the classifier's most important feature.
fn justification(classifier: &dyn Classifier) -> String {
    let names = classifier.feature_names();
    classifier
        .feature_importances()
        .filter(|imp| imp.len() == names.len())
        .and_then(|imp| {
            imp.iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(idx, _)| format!("High {} usage", names[idx]))
        })
        .unwrap_or_else(|| format!("Flagged by {} classifier", classifier.name()))
}

/// Index of the feature with the largest absolute z-score for `row`.
fn most_deviant(columns: &[Series], row: &[f64]) -> Option<usize> {
    columns
        .iter()
        .zip(row)
        .enumerate()
        .filter_map(|(j, (col, &v))| col.z_score(v).ok().map(|z| (j, z.abs())))
        .filter(|(_, z)| z.is_finite() && *z > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(j, _)| j)
}

fn trim_float(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.0}", v)
    } else {
        format!("{:.2}", v)
    }
}

fn record(out: &mut ScorerOutput, scorer: &str, result: Result<Vec<Flag>, ScoreError>) {
    match result {
        Ok(flags) => {
            debug!(scorer, flagged = flags.len(), "scorer finished");
            out.flags.extend(flags);
        }
        Err(e) => {
            let schema_mismatch = e.is_schema_mismatch();
            if schema_mismatch {
                error!(scorer, error = %e, "scorer schema mismatch; results for this scorer are untrustworthy");
            } else {
                warn!(scorer, error = %e, "scorer failed");
            }
            out.failures.push(ScorerFailure {
                scorer: scorer.to_string(),
                schema_mismatch,
                error: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnMap;
    use crate::events::normalize;
    use serde_json::json;

    /// Flags whichever row has the largest first feature.
    struct MaxFirst;

    impl OutlierModel for MaxFirst {
        fn name(&self) -> &str {
            "max_first"
        }

        fn fit_predict(&self, matrix: &[Vec<f64>], _c: f64) -> Result<OutlierOutput, ScoreError> {
            let max = matrix.iter().map(|r| r[0]).fold(f64::MIN, f64::max);
            Ok(OutlierOutput {
                labels: matrix.iter().map(|r| if r[0] == max { -1 } else { 1 }).collect(),
                scores: matrix.iter().map(|r| r[0] / max).collect(),
            })
        }
    }

    struct FixedClassifier {
        features: Vec<String>,
        importances: Option<Vec<f64>>,
        short: bool,
    }

    impl Classifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }

        fn feature_names(&self) -> &[String] {
            &self.features
        }

        fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<u8>, ScoreError> {
            let n = if self.short { rows.len() - 1 } else { rows.len() };
            Ok(rows.iter().take(n).map(|r| u8::from(r[0] > 2.0)).collect())
        }

        fn feature_importances(&self) -> Option<Vec<f64>> {
            self.importances.clone()
        }
    }

    fn table() -> EventTable {
        let mut values = Vec::new();
        for i in 0..5 {
            values.push(json!({ "x_real_ip": "busy", "request_path": format!("/p{}", i), "start_time": "2024-05-01T10:00:00Z" }));
        }
        values.push(json!({ "x_real_ip": "quiet", "request_path": "/p", "start_time": "2024-05-01T10:00:00Z" }));
        values.push(json!({ "x_real_ip": "calm", "request_path": "/p", "start_time": "2024-05-01T10:05:00Z" }));
        let records: Vec<_> = values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        normalize(&records, &ColumnMap::default(), 60)
    }

    fn scorer() -> AnomalyScorer {
        AnomalyScorer::new(Arc::new(MaxFirst), &ScorerConfig::default())
    }

    #[test]
    fn test_outlier_labels_become_flags() {
        let t = table();
        let out = scorer().score(&t);
        assert!(out.failures.is_empty());

        let behavioral: Vec<&Flag> = out
            .flags
            .iter()
            .filter(|f| f.category == Category::BehavioralOutlier)
            .collect();
        assert_eq!(behavioral.len(), 1);
        assert_eq!(behavioral[0].entity_key, "busy");
        assert_eq!(behavioral[0].evidence.len(), 5);
        assert!(behavioral[0].reason.starts_with("unusual "));

        let bursts: Vec<&Flag> = out
            .flags
            .iter()
            .filter(|f| f.category == Category::BurstAttempts)
            .collect();
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].entity_key, "busy");
        assert_eq!(bursts[0].score, 5.0);

        // A single day gives nothing to compare.
        assert!(out.flags.iter().all(|f| f.category != Category::VolumeSpike));
    }

    #[test]
    fn test_classifier_justification() {
        let t = table();
        let classifier = FixedClassifier {
            features: vec!["request_count".to_string(), "distinct_paths".to_string()],
            importances: Some(vec![0.2, 0.8]),
            short: false,
        };
        let out = scorer().with_classifier(Arc::new(classifier)).score(&t);
        let flags: Vec<&Flag> = out
            .flags
            .iter()
            .filter(|f| f.category == Category::Classifier)
            .collect();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].entity_key, "busy");
        assert_eq!(flags[0].reason, "High distinct_paths usage");
        assert_eq!(flags[0].score, 1.0);
    }

    #[test]
    fn test_classifier_schema_mismatch_is_reported() {
        let t = table();
        let classifier = FixedClassifier {
            features: vec!["request_count".to_string(), "watch_time_secs".to_string()],
            importances: None,
            short: false,
        };
        let out = scorer().with_classifier(Arc::new(classifier)).score(&t);
        assert_eq!(out.failures.len(), 1);
        let failure = &out.failures[0];
        assert!(failure.schema_mismatch);
        assert_eq!(failure.scorer, "classifier:fixed");
        assert!(failure.error.contains("watch_time_secs"));
        // Unsupervised targets still ran.
        assert!(out.flags.iter().any(|f| f.category == Category::BehavioralOutlier));
    }

    /// Labels every row an outlier but reports no scores.
    struct LabelsOnly;

    impl OutlierModel for LabelsOnly {
        fn name(&self) -> &str {
            "labels_only"
        }

        fn fit_predict(&self, matrix: &[Vec<f64>], _c: f64) -> Result<OutlierOutput, ScoreError> {
            Ok(OutlierOutput {
                labels: vec![-1; matrix.len()],
                scores: Vec::new(),
            })
        }
    }

    #[test]
    fn test_missing_outlier_scores_fail_per_target() {
        let t = table();
        let classifier = FixedClassifier {
            features: vec!["request_count".to_string()],
            importances: None,
            short: false,
        };
        let out = AnomalyScorer::new(Arc::new(LabelsOnly), &ScorerConfig::default())
            .with_classifier(Arc::new(classifier))
            .score(&t);

        let failed: Vec<&str> = out.failures.iter().map(|f| f.scorer.as_str()).collect();
        assert_eq!(failed, vec!["behavioral_outlier", "burst_attempts"]);
        assert!(out.failures.iter().all(|f| !f.schema_mismatch));
        assert!(out.failures[0].error.contains("labels_only returned 0 scores for 3 rows"));

        // The classifier target is unaffected.
        assert!(out.flags.iter().all(|f| f.category == Category::Classifier));
        assert_eq!(out.flags.len(), 1);
    }

    #[test]
    fn test_short_prediction_is_schema_mismatch() {
        let t = table();
        let classifier = FixedClassifier {
            features: vec!["request_count".to_string()],
            importances: None,
            short: true,
        };
        let out = scorer().with_classifier(Arc::new(classifier)).score(&t);
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].schema_mismatch);
    }

    #[test]
    fn test_justification_fallback() {
        let classifier = FixedClassifier {
            features: vec!["request_count".to_string()],
            importances: Some(vec![1.0, 2.0]),
            short: false,
        };
        assert_eq!(justification(&classifier), "Flagged by fixed classifier");
    }

    #[test]
    fn test_volume_spike_over_days() {
        let mut values = Vec::new();
        for day in 1..=6 {
            let n = if day == 4 { 40 } else { 3 };
            for i in 0..n {
                values.push(json!({
                    "x_real_ip": format!("ip{}", i % 3),
                    "start_time": format!("2024-05-0{}T{:02}:00:00Z", day, i % 24),
                }));
            }
        }
        let records: Vec<_> = values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        let t = normalize(&records, &ColumnMap::default(), 60);

        let out = scorer().score(&t);
        let spikes: Vec<&Flag> = out
            .flags
            .iter()
            .filter(|f| f.category == Category::VolumeSpike)
            .collect();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].entity_key, "2024-05-04");
        assert_eq!(spikes[0].evidence.len(), 40);
    }

    #[test]
    fn test_empty_table_scores_nothing() {
        let t = normalize(&[], &ColumnMap::default(), 60);
        let out = scorer().score(&t);
        assert!(out.flags.is_empty());
        assert!(out.failures.is_empty());
    }
}
