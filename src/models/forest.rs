//! Random forest of bootstrap-sampled CART trees

use super::tree::{RegressionTree, TreeParams};
use super::{check_training_input, Classifier, InputScaling};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; square root of the width when unset
    pub max_features: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 50,
            max_depth: 8,
            min_samples_leaf: 3,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    seed: u64,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn new(params: ForestParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            trees: Vec::new(),
        }
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn max_feature_index(&self) -> Option<usize> {
        self.trees.iter().filter_map(RegressionTree::max_feature_index).max()
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool]) -> Result<()> {
        let width = check_training_input(features, labels)?;
        let n = labels.len();
        let targets: Vec<f64> = labels.iter().map(|&y| if y { 1.0 } else { 0.0 }).collect();
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: Some(
                self.params
                    .max_features
                    .unwrap_or_else(|| (width as f64).sqrt().ceil() as usize),
            ),
        };

        let mut rng = StdRng::seed_from_u64(self.seed);
        self.trees = (0..self.params.n_trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(features, &targets, &bootstrap, &tree_params, &mut rng)
            })
            .collect();
        Ok(())
    }

    fn predict_probability(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        (total / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    fn input_scaling(&self) -> InputScaling {
        InputScaling::Raw
    }
}
