//! Isolation forest outlier model.
//!
//! Points that random axis-aligned splits isolate in few steps are
//! outliers. The forest is refit on every call, so it carries no state
//! between runs besides its settings and seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::analysis::stats::Series;
use crate::analysis::{OutlierModel, OutlierOutput, ScoreError};
use crate::config::ScorerConfig;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: usize,
    sample_size: usize,
    seed: u64,
}

enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl IsolationForest {
    pub fn new(trees: usize, sample_size: usize, seed: u64) -> Self {
        Self {
            trees: trees.max(1),
            sample_size: sample_size.max(2),
            seed,
        }
    }

    pub fn from_config(config: &ScorerConfig) -> Self {
        Self::new(config.trees, config.sample_size, config.seed)
    }

    /// Anomaly score per row in `(0, 1]`; higher is more isolated.
    pub fn score(&self, matrix: &[Vec<f64>]) -> Result<Vec<f64>, ScoreError> {
        let width = validate(matrix)?;
        let n = matrix.len();
        let psi = self.sample_size.min(n);
        let max_depth = (psi as f64).log2().ceil() as usize;
        let norm = average_path_length(psi);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut depth_sum = vec![0.0; n];
        for _ in 0..self.trees {
            let sample = rand::seq::index::sample(&mut rng, n, psi).into_vec();
            let tree = build(matrix, sample, width, 0, max_depth, &mut rng);
            for (i, row) in matrix.iter().enumerate() {
                depth_sum[i] += path_length(&tree, row, 0);
            }
        }

        Ok(depth_sum
            .into_iter()
            .map(|sum| {
                let mean_depth = sum / self.trees as f64;
                if norm > 0.0 {
                    2f64.powf(-mean_depth / norm)
                } else {
                    0.5
                }
            })
            .collect())
    }
}

impl OutlierModel for IsolationForest {
    fn name(&self) -> &str {
        "isolation_forest"
    }

    fn fit_predict(&self, matrix: &[Vec<f64>], contamination: f64) -> Result<OutlierOutput, ScoreError> {
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(ScoreError::InvalidInput(format!(
                "contamination must be in (0, 0.5], got {}",
                contamination
            )));
        }
        let scores = self.score(matrix)?;
        let threshold = Series::new(scores.clone())
            .quantile(1.0 - contamination)
            .unwrap_or(f64::INFINITY);
        let labels: Vec<i8> = scores
            .iter()
            .map(|&s| if s > threshold { -1 } else { 1 })
            .collect();
        debug!(
            rows = matrix.len(),
            threshold,
            outliers = labels.iter().filter(|&&l| l == -1).count(),
            "isolation forest scored"
        );
        Ok(OutlierOutput { labels, scores })
    }
}

fn validate(matrix: &[Vec<f64>]) -> Result<usize, ScoreError> {
    let first = matrix
        .first()
        .ok_or_else(|| ScoreError::InvalidInput("empty feature matrix".to_string()))?;
    let width = first.len();
    if width == 0 {
        return Err(ScoreError::InvalidInput("feature matrix has no columns".to_string()));
    }
    if let Some(bad) = matrix.iter().position(|r| r.len() != width) {
        return Err(ScoreError::InvalidInput(format!(
            "row {} has {} features, expected {}",
            bad,
            matrix[bad].len(),
            width
        )));
    }
    if matrix.iter().flatten().any(|v| !v.is_finite()) {
        return Err(ScoreError::InvalidInput("feature matrix has non-finite values".to_string()));
    }
    Ok(width)
}

fn build(
    matrix: &[Vec<f64>],
    rows: Vec<usize>,
    width: usize,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if rows.len() <= 1 || depth >= max_depth {
        return Node::Leaf { size: rows.len() };
    }

    // Only features that still vary inside this node can split it.
    let mut candidates = Vec::new();
    for f in 0..width {
        let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
            (lo.min(matrix[r][f]), hi.max(matrix[r][f]))
        });
        if hi > lo {
            candidates.push((f, lo, hi));
        }
    }
    if candidates.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| matrix[r][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build(matrix, left, width, depth + 1, max_depth, rng)),
        right: Box::new(build(matrix, right, width, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if row[*feature] < *threshold {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// Average unsuccessful-search path length in a BST of `n` nodes.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut rows: Vec<Vec<f64>> = (0..49)
            .map(|i| vec![1.0 + (i % 7) as f64 * 0.1, 1.0 + (i / 7) as f64 * 0.1])
            .collect();
        rows.push(vec![100.0, 100.0]);
        rows
    }

    #[test]
    fn test_isolates_far_point() {
        let forest = IsolationForest::new(100, 256, 42);
        let out = forest.fit_predict(&cluster_with_outlier(), 0.05).unwrap();
        assert_eq!(out.labels.len(), 50);
        assert_eq!(out.labels[49], -1);
        let max = out.scores.iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(out.scores[49], max);
        assert!(out.labels.iter().filter(|&&l| l == -1).count() <= 3);
    }

    #[test]
    fn test_same_seed_same_result() {
        let forest = IsolationForest::new(50, 32, 7);
        let a = forest.fit_predict(&cluster_with_outlier(), 0.1).unwrap();
        let b = forest.fit_predict(&cluster_with_outlier(), 0.1).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.scores, b.scores);
    }

    #[test]
    fn test_constant_input_has_no_outliers() {
        let forest = IsolationForest::new(20, 256, 42);
        let out = forest.fit_predict(&vec![vec![3.0, 3.0]; 10], 0.1).unwrap();
        assert!(out.labels.iter().all(|&l| l == 1));
    }

    #[test]
    fn test_rejects_bad_input() {
        let forest = IsolationForest::new(10, 16, 1);
        assert!(forest.fit_predict(&[], 0.1).is_err());
        assert!(forest.fit_predict(&[vec![1.0], vec![1.0, 2.0]], 0.1).is_err());
        assert!(forest.fit_predict(&[vec![1.0], vec![2.0]], 0.9).is_err());
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }
}
