//! Summary statistics over one feature column.

use crate::analysis::ScoreError;

/// Fewest values a z-score is computed against.
const MIN_BASELINE: usize = 3;

pub struct Series {
    values: Vec<f64>,
}

impl Series {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Arithmetic mean; `0.0` for an empty series.
    pub fn mean(&self) -> f64 {
        match self.values.len() {
            0 => 0.0,
            n => self.values.iter().sum::<f64>() / n as f64,
        }
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq: f64 = self.values.iter().map(|&x| (x - mean) * (x - mean)).sum();
        (sum_sq / self.values.len() as f64).sqrt()
    }

    /// Distance of `value` from the mean in standard deviations. A constant
    /// series puts any other value infinitely far away.
    pub fn z_score(&self, value: f64) -> Result<f64, ScoreError> {
        if self.values.len() < MIN_BASELINE {
            return Err(ScoreError::InsufficientData {
                needed: MIN_BASELINE,
                have: self.values.len(),
            });
        }
        let mean = self.mean();
        let std = self.std_dev();
        if std == 0.0 {
            return Ok(if (value - mean).abs() > f64::EPSILON {
                f64::INFINITY
            } else {
                0.0
            });
        }
        Ok((value - mean) / std)
    }

    /// Linear-interpolated quantile, `q` clamped to `[0, 1]`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
    }
}
