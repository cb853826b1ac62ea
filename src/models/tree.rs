//! CART regression tree on squared error.
//!
//! Fit on 0/1 targets the split criterion equals Gini impurity and leaf values
//! are class frequencies, which is how the random forest uses it. Gradient
//! boosting fits it on residuals and then overwrites leaf values.

use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; all when `None`
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitChoice {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Fit on the rows listed in `samples` (repeats allowed, for bootstrapping).
    pub fn fit<R: Rng>(
        features: &[Vec<f64>],
        targets: &[f64],
        samples: &[usize],
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        if samples.is_empty() {
            tree.nodes.push(Node::Leaf { value: 0.0 });
            return tree;
        }
        tree.grow(features, targets, samples.to_vec(), 0, params, rng);
        tree
    }

    fn grow<R: Rng>(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        samples: Vec<usize>,
        depth: usize,
        params: &TreeParams,
        rng: &mut R,
    ) -> usize {
        let n = samples.len() as f64;
        let sum: f64 = samples.iter().map(|&i| targets[i]).sum();
        let mean = sum / n;

        let node = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        let min_leaf = params.min_samples_leaf.max(1);
        let pure = samples.iter().all(|&i| targets[i] == targets[samples[0]]);
        if depth >= params.max_depth || samples.len() < 2 * min_leaf || pure {
            return node;
        }

        let Some(best) = best_split(features, targets, &samples, sum, min_leaf, params, rng) else {
            return node;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| features[i][best.feature] <= best.threshold);

        let left = self.grow(features, targets, left, depth + 1, params, rng);
        let right = self.grow(features, targets, right, depth + 1, params, rng);
        self.nodes[node] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node
    }

    /// Index of the leaf `row` lands in
    pub fn leaf_index(&self, row: &[f64]) -> usize {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => return idx,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        match &self.nodes[self.leaf_index(row)] {
            Node::Leaf { value } => *value,
            Node::Split { .. } => 0.0,
        }
    }

    /// Overwrite the value of a leaf node; ignored for split nodes
    pub fn set_leaf_value(&mut self, node: usize, new_value: f64) {
        if let Some(Node::Leaf { value }) = self.nodes.get_mut(node) {
            *value = new_value;
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_feature_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Split { feature, .. } => Some(*feature),
                Node::Leaf { .. } => None,
            })
            .max()
    }
}

fn best_split<R: Rng>(
    features: &[Vec<f64>],
    targets: &[f64],
    samples: &[usize],
    total: f64,
    min_leaf: usize,
    params: &TreeParams,
    rng: &mut R,
) -> Option<SplitChoice> {
    let width = features[samples[0]].len();
    let candidates: Vec<usize> = match params.max_features {
        Some(k) if k < width => index::sample(rng, width, k.max(1)).into_vec(),
        _ => (0..width).collect(),
    };

    let n = samples.len();
    let base = total * total / n as f64;
    let mut best: Option<SplitChoice> = None;
    let mut column: Vec<(f64, f64)> = Vec::with_capacity(n);

    for feature in candidates {
        column.clear();
        column.extend(samples.iter().map(|&i| (features[i][feature], targets[i])));
        column.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        for split in 1..n {
            left_sum += column[split - 1].1;
            if split < min_leaf || n - split < min_leaf {
                continue;
            }
            let (lo, hi) = (column[split - 1].0, column[split].0);
            if lo == hi {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / split as f64
                + right_sum * right_sum / (n - split) as f64
                - base;
            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(SplitChoice {
                    feature,
                    threshold: lo + (hi - lo) / 2.0,
                    gain,
                });
            }
        }
    }

    best
}
