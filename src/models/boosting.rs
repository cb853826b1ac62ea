//! Gradient boosting on log-loss.
//!
//! Each round fits a regression tree to the residuals `y - p`, then replaces
//! every leaf with a single Newton step `sum(r) / sum(p(1-p))` over the rows
//! that landed in it.

use super::tree::{RegressionTree, TreeParams};
use super::{check_training_input, sigmoid, Classifier, InputScaling};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MAX_LEAF_STEP: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn (without replacement) per round
    pub subsample: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 5,
            subsample: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    params: BoostingParams,
    seed: u64,
    base_score: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn new(params: BoostingParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            base_score: 0.0,
            trees: Vec::new(),
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn max_feature_index(&self) -> Option<usize> {
        self.trees.iter().filter_map(RegressionTree::max_feature_index).max()
    }

    fn raw_score(&self, row: &[f64]) -> f64 {
        self.base_score
            + self.params.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

impl Classifier for GradientBoosting {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool]) -> Result<()> {
        check_training_input(features, labels)?;
        let n = labels.len();
        let targets: Vec<f64> = labels.iter().map(|&y| if y { 1.0 } else { 0.0 }).collect();

        let prior = (targets.iter().sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6);
        self.base_score = (prior / (1.0 - prior)).ln();
        self.trees.clear();

        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: None,
        };
        let subsample = self.params.subsample.clamp(0.0, 1.0);
        let rows_per_round = ((n as f64 * subsample).round() as usize).clamp(1, n);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut scores = vec![self.base_score; n];
        let mut residuals = vec![0.0; n];
        let mut probabilities = vec![0.0; n];

        for _ in 0..self.params.n_estimators {
            for i in 0..n {
                probabilities[i] = sigmoid(scores[i]);
                residuals[i] = targets[i] - probabilities[i];
            }

            let samples: Vec<usize> = if rows_per_round < n {
                index::sample(&mut rng, n, rows_per_round).into_vec()
            } else {
                (0..n).collect()
            };

            let mut tree = RegressionTree::fit(features, &residuals, &samples, &tree_params, &mut rng);

            // (sum of residuals, sum of hessians) per leaf
            let mut leaves: HashMap<usize, (f64, f64)> = HashMap::new();
            for &i in &samples {
                let entry = leaves.entry(tree.leaf_index(&features[i])).or_default();
                entry.0 += residuals[i];
                entry.1 += probabilities[i] * (1.0 - probabilities[i]);
            }
            for (leaf, (gradient, hessian)) in leaves {
                let step = (gradient / hessian.max(1e-12)).clamp(-MAX_LEAF_STEP, MAX_LEAF_STEP);
                tree.set_leaf_value(leaf, step);
            }

            for (score, row) in scores.iter_mut().zip(features) {
                *score += self.params.learning_rate * tree.predict(row);
            }
            self.trees.push(tree);
        }

        Ok(())
    }

    fn predict_probability(&self, row: &[f64]) -> f64 {
        sigmoid(self.raw_score(row))
    }

    fn input_scaling(&self) -> InputScaling {
        InputScaling::Raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> (Vec<Vec<f64>>, Vec<bool>) {
        let features: Vec<Vec<f64>> = (0..200)
            .map(|i| vec![(i % 50) as f64, (i % 7) as f64])
            .collect();
        let labels = features.iter().map(|r| r[0] >= 40.0).collect();
        (features, labels)
    }

    #[test]
    fn test_base_score_is_prior_log_odds() {
        let (features, labels) = dataset();
        let mut model = GradientBoosting::new(
            BoostingParams {
                n_estimators: 0,
                ..BoostingParams::default()
            },
            1,
        );
        model.fit(&features, &labels).unwrap();

        // 40 of 200 rows are positive
        assert!((model.predict_probability(&[0.0, 0.0]) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_separates_classes() {
        let (features, labels) = dataset();
        let mut model = GradientBoosting::new(BoostingParams::default(), 1);
        model.fit(&features, &labels).unwrap();

        assert_eq!(model.tree_count(), 100);
        assert!(model.predict_probability(&[45.0, 3.0]) > 0.9);
        assert!(model.predict_probability(&[10.0, 3.0]) < 0.1);
        assert_eq!(model.max_feature_index(), Some(0));
    }

    #[test]
    fn test_subsampling_is_seeded() {
        let (features, labels) = dataset();
        let params = BoostingParams {
            n_estimators: 10,
            subsample: 0.5,
            ..BoostingParams::default()
        };
        let mut a = GradientBoosting::new(params.clone(), 9);
        let mut b = GradientBoosting::new(params, 9);
        a.fit(&features, &labels).unwrap();
        b.fit(&features, &labels).unwrap();
        assert_eq!(a, b);
    }
}
