//! Isolation Forest for univariate windows
//!
//! Each tree is grown on a random subsample by picking a uniformly random
//! split between the current minimum and maximum until every point is
//! isolated or the height limit `ceil(log2(subsample))` is hit. Points that
//! are easy to separate end up with short average path lengths.
//!
//! Score: `s(x) = 2^(-E[h(x)] / c(n))`, in (0, 1]; values close to 1 are
//! anomalous, values well below 0.5 are ordinary.
//!
//! Internal nodes also keep the value range of the points they split, the
//! way random cut forests keep bounding boxes. A query outside that range is
//! isolated at that node, so values beyond anything seen in training score
//! higher than every training point instead of tying with the extremes.
//!
//! The decision threshold is the `(1 - contamination)` quantile of the
//! training scores, so roughly `contamination` of the fit window lies outside
//! the inlier region.
//!
//! Reference: "Isolation Forest" (Liu, Ting, Zhou, ICDM 2008)

use crate::error::FitError;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

/// Euler–Mascheroni constant, used by the harmonic number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// A node in an isolation tree
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
enum IsoNode {
    Internal {
        split: f64,
        lower: f64,
        upper: f64,
        left: Box<IsoNode>,
        right: Box<IsoNode>,
    },
    /// External node; `size` points were still together when growth stopped.
    Leaf { size: usize },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
struct IsoTree {
    root: IsoNode,
}

impl IsoTree {
    fn grow<R: Rng>(rng: &mut R, sample: &mut [f64], height_limit: usize) -> Self {
        Self {
            root: grow_recursive(rng, sample, 0, height_limit),
        }
    }

    fn path_length(&self, value: f64) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                IsoNode::Leaf { size } => return depth + average_path_length(*size),
                IsoNode::Internal {
                    split,
                    lower,
                    upper,
                    left,
                    right,
                } => {
                    depth += 1.0;
                    if value < *lower || value > *upper {
                        return depth;
                    }
                    node = if value < *split { left } else { right };
                }
            }
        }
    }
}

fn grow_recursive<R: Rng>(
    rng: &mut R,
    points: &mut [f64],
    depth: usize,
    height_limit: usize,
) -> IsoNode {
    if depth >= height_limit || points.len() <= 1 {
        return IsoNode::Leaf { size: points.len() };
    }

    let (min, max) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if max - min <= f64::EPSILON * max.abs().max(1.0) {
        return IsoNode::Leaf { size: points.len() };
    }

    let split = rng.random_range(min..max);

    // Partition in place: values below the split go left.
    let mut boundary = 0;
    for i in 0..points.len() {
        if points[i] < split {
            points.swap(i, boundary);
            boundary += 1;
        }
    }
    let (lower, upper) = points.split_at_mut(boundary);

    IsoNode::Internal {
        split,
        lower: min,
        upper: max,
        left: Box::new(grow_recursive(rng, lower, depth + 1, height_limit)),
        right: Box::new(grow_recursive(rng, upper, depth + 1, height_limit)),
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Forest settings. Stateless; [`IsolationForest::fit`] returns a new model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    n_trees: usize,
    max_samples: usize,
    contamination: f64,
}

/// Fitted forest plus its decision threshold.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FittedForest {
    trees: Vec<IsoTree>,
    subsample: usize,
    threshold: f64,
    training_size: usize,
}

impl IsolationForest {
    /// `n_trees` is clamped to at least 1, `max_samples` to at least 2 and
    /// `contamination` to (0, 0.5].
    pub fn new(n_trees: usize, max_samples: usize, contamination: f64) -> Self {
        Self {
            n_trees: n_trees.max(1),
            max_samples: max_samples.max(2),
            contamination: contamination.clamp(f64::EPSILON, 0.5),
        }
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    /// Grow a fresh forest on `data` using randomness from `seed`.
    pub fn fit(&self, data: &[f64], seed: u64) -> Result<FittedForest, FitError> {
        if data.len() < 2 {
            return Err(FitError::InsufficientData {
                required: 2,
                actual: data.len(),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let subsample = self.max_samples.min(data.len());
        let height_limit = (subsample as f64).log2().ceil() as usize;

        let trees = (0..self.n_trees)
            .map(|_| {
                let mut points: Vec<f64> = sample(&mut rng, data.len(), subsample)
                    .into_iter()
                    .map(|i| data[i])
                    .collect();
                IsoTree::grow(&mut rng, &mut points, height_limit)
            })
            .collect();

        let mut forest = FittedForest {
            trees,
            subsample,
            threshold: f64::INFINITY,
            training_size: data.len(),
        };

        let mut training_scores: Vec<f64> = data.iter().map(|&v| forest.score(v)).collect();
        training_scores.sort_by(|a, b| a.total_cmp(b));
        forest.threshold = quantile_sorted(&training_scores, 1.0 - self.contamination);

        Ok(forest)
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new(100, 256, 0.05)
    }
}

impl FittedForest {
    /// Anomaly score in (0, 1].
    pub fn score(&self, value: f64) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(value))
            .sum::<f64>()
            / self.trees.len() as f64;
        let normaliser = average_path_length(self.subsample).max(f64::EPSILON);
        2f64.powf(-mean_path / normaliser)
    }

    /// Strictly above the training quantile.
    pub fn is_anomaly(&self, score: f64) -> bool {
        score > self.threshold
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn training_size(&self) -> usize {
        self.training_size
    }
}

/// Linear-interpolated quantile of an ascending slice.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::INFINITY;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    fn gaussian(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(10.0, 1.0).unwrap();
        (0..n).map(|_| normal.sample(&mut rng)).collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        let c256 = average_path_length(256);
        assert!((c256 - 10.24).abs() < 0.05, "c(256) = {}", c256);
    }

    #[test]
    fn test_quantile_interpolates() {
        let sorted = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&sorted, 0.5), 2.0);
        assert!((quantile_sorted(&sorted, 0.9) - 3.6).abs() < 1e-12);
    }

    #[test]
    fn test_outlier_scores_higher_than_inlier() {
        let data = gaussian(200, 3);
        let forest = IsolationForest::default().fit(&data, 42).unwrap();

        let inlier = forest.score(10.0);
        let outlier = forest.score(30.0);
        assert!(outlier > inlier, "{} should exceed {}", outlier, inlier);
        assert!(forest.is_anomaly(outlier));
        assert!(!forest.is_anomaly(inlier));
    }

    #[test]
    fn test_contamination_sets_training_flag_rate() {
        let data = gaussian(200, 9);
        let forest = IsolationForest::new(100, 256, 0.05).fit(&data, 1).unwrap();
        let flagged = data
            .iter()
            .filter(|&&v| forest.is_anomaly(forest.score(v)))
            .count();
        assert!(flagged <= 10, "flagged {} of 200", flagged);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = gaussian(120, 4);
        let a = IsolationForest::default().fit(&data, 77).unwrap();
        let b = IsolationForest::default().fit(&data, 77).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_point_rejected() {
        let err = IsolationForest::default().fit(&[1.0], 0).unwrap_err();
        assert_eq!(
            err,
            FitError::InsufficientData {
                required: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_constant_window_fits_without_splits() {
        let forest = IsolationForest::default().fit(&[5.0; 20], 0).unwrap();
        assert!(forest.score(5.0).is_finite());
        assert!(!forest.is_anomaly(forest.score(5.0)));
    }
}
