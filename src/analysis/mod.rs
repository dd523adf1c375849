//! Feature aggregation and statistical scoring.
//!
//! The scorer consumes the dense entity feature table through two injected
//! capabilities: an unsupervised [`OutlierModel`] and an optional
//! pretrained [`Classifier`].

pub mod aggregator;
pub mod isolation;
pub mod model;
pub mod scorer;
pub mod stats;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("scorer schema mismatch: model expects {expected:?}, missing {missing:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        missing: Vec<String>,
    },

    #[error("scorer schema mismatch: {got} predictions for {expected} rows")]
    PredictionCount { expected: usize, got: usize },

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: need {needed} samples, have {have}")]
    InsufficientData { needed: usize, have: usize },
}

impl ScoreError {
    /// Training and inference disagree on the feature layout.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self,
            ScoreError::SchemaMismatch { .. } | ScoreError::PredictionCount { .. }
        )
    }
}

/// Per-row result of an unsupervised model.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierOutput {
    /// `-1` outlier, `1` inlier.
    pub labels: Vec<i8>,
    /// Higher is more anomalous.
    pub scores: Vec<f64>,
}

impl OutlierOutput {
    pub fn is_outlier(&self, row: usize) -> bool {
        self.labels.get(row) == Some(&-1)
    }
}

/// Unsupervised outlier detection over a feature matrix.
pub trait OutlierModel: Send + Sync {
    fn name(&self) -> &str;

    /// Fit on `matrix` and label every row, expecting about
    /// `contamination` of the rows to be outliers.
    fn fit_predict(&self, matrix: &[Vec<f64>], contamination: f64) -> Result<OutlierOutput, ScoreError>;
}

/// A pretrained binary classifier.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Training feature order; rows passed to [`Classifier::predict`] follow it.
    fn feature_names(&self) -> &[String];

    /// `0` benign, `1` flagged.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<u8>, ScoreError>;

    /// Confidence per row, when the model has one.
    fn scores(&self, _rows: &[Vec<f64>]) -> Option<Vec<f64>> {
        None
    }

    /// One weight per feature in [`Classifier::feature_names`] order.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }
}
