use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::analysis::{Classifier, ScoreError};

/// Pretrained binary logistic-regression classifier.
///
/// Loaded from a JSON export holding the training feature order, the
/// standardization parameters and the fitted weights.
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticClassifier {
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    /// Probability at or above which a row is flagged.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

impl LogisticClassifier {
    /// Load a model from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ScoreError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ScoreError::InvalidModel(format!("failed to read {}: {}", path.display(), e))
        })?;
        let model = Self::from_json(&content)?;
        info!(path = %path.display(), features = model.feature_names.len(), "loaded classifier");
        Ok(model)
    }

    pub fn from_json(content: &str) -> Result<Self, ScoreError> {
        let model: Self = serde_json::from_str(content)
            .map_err(|e| ScoreError::InvalidModel(format!("failed to parse model: {}", e)))?;
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> Result<(), ScoreError> {
        let n = self.feature_names.len();
        if n == 0 {
            return Err(ScoreError::InvalidModel("model has no features".to_string()));
        }
        for (name, len) in [
            ("weights", self.weights.len()),
            ("means", self.means.len()),
            ("stds", self.stds.len()),
        ] {
            if len != n {
                return Err(ScoreError::InvalidModel(format!(
                    "{} has {} entries for {} features",
                    name, len, n
                )));
            }
        }
        Ok(())
    }

    /// Probability of the flagged class for each row.
    pub fn probabilities(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ScoreError> {
        rows.iter()
            .map(|raw| {
                if raw.len() != self.weights.len() {
                    return Err(ScoreError::SchemaMismatch {
                        expected: self.feature_names.clone(),
                        missing: Vec::new(),
                    });
                }
                // Standardize, then dot product + bias
                let mut z = self.bias;
                for (i, val) in raw.iter().enumerate() {
                    let std = if self.stds[i].abs() > f64::EPSILON { self.stds[i] } else { 1.0 };
                    z += self.weights[i] * (val - self.means[i]) / std;
                }
                Ok(1.0 / (1.0 + (-z).exp()))
            })
            .collect()
    }
}

impl Classifier for LogisticClassifier {
    fn name(&self) -> &str {
        "logistic"
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<u8>, ScoreError> {
        Ok(self
            .probabilities(rows)?
            .into_iter()
            .map(|p| u8::from(p >= self.threshold))
            .collect())
    }

    fn scores(&self, rows: &[Vec<f64>]) -> Option<Vec<f64>> {
        self.probabilities(rows).ok()
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        Some(self.weights.iter().map(|w| w.abs()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "feature_names": ["request_count", "distinct_paths"],
        "weights": [3.0, -0.5],
        "bias": -1.0,
        "means": [20.0, 5.0],
        "stds": [10.0, 2.0]
    }"#;

    #[test]
    fn test_predicts_high_volume() {
        let model = LogisticClassifier::from_json(MODEL).unwrap();
        let labels = model
            .predict(&[vec![500.0, 3.0], vec![5.0, 6.0]])
            .unwrap();
        assert_eq!(labels, vec![1, 0]);

        let probs = model.probabilities(&[vec![500.0, 3.0]]).unwrap();
        assert!(probs[0] > 0.99);
    }

    #[test]
    fn test_importances_follow_weights() {
        let model = LogisticClassifier::from_json(MODEL).unwrap();
        assert_eq!(model.feature_importances(), Some(vec![3.0, 0.5]));
        assert!((model.threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_row_width_mismatch() {
        let model = LogisticClassifier::from_json(MODEL).unwrap();
        assert!(matches!(
            model.predict(&[vec![1.0]]),
            Err(ScoreError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_inconsistent_model_is_rejected() {
        let bad = r#"{ "feature_names": ["a", "b"], "weights": [1.0], "bias": 0.0, "means": [0.0, 0.0], "stds": [1.0, 1.0] }"#;
        assert!(matches!(
            LogisticClassifier::from_json(bad),
            Err(ScoreError::InvalidModel(_))
        ));
        assert!(LogisticClassifier::from_json("not json").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(LogisticClassifier::load(Path::new("does/not/exist.json")).is_err());
    }
}
