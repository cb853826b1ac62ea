//! L2-regularised logistic regression trained by full-batch gradient descent

use super::{check_training_input, sigmoid, Classifier, InputScaling};
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
    /// Weight classes inversely to their frequency
    pub balanced: bool,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            epochs: 300,
            l2: 1e-4,
            balanced: false,
        }
    }
}

impl LogisticParams {
    /// Settings used for the meta-classifier over base probabilities
    pub fn meta() -> Self {
        Self {
            learning_rate: 0.5,
            epochs: 1000,
            l2: 1e-4,
            balanced: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    params: LogisticParams,
    weights: Vec<f64>,
    bias: f64,
}

impl LogisticRegression {
    pub fn new(params: LogisticParams) -> Self {
        Self {
            params,
            weights: Vec::new(),
            bias: 0.0,
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    fn logit(&self, row: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(row)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool]) -> Result<()> {
        let width = check_training_input(features, labels)?;
        let n = labels.len() as f64;
        let positives = labels.iter().filter(|&&y| y).count() as f64;
        let negatives = n - positives;

        let (w_pos, w_neg) = if self.params.balanced && positives > 0.0 && negatives > 0.0 {
            (n / (2.0 * positives), n / (2.0 * negatives))
        } else {
            (1.0, 1.0)
        };
        let total_weight = positives * w_pos + negatives * w_neg;

        self.weights = vec![0.0; width];
        self.bias = 0.0;
        let lr = self.params.learning_rate;
        let mut grad = vec![0.0; width];

        for _ in 0..self.params.epochs {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_bias = 0.0;

            for (row, &y) in features.iter().zip(labels) {
                let (target, weight) = if y { (1.0, w_pos) } else { (0.0, w_neg) };
                let err = (sigmoid(self.logit(row)) - target) * weight;
                for (g, x) in grad.iter_mut().zip(row) {
                    *g += err * x;
                }
                grad_bias += err;
            }

            for (w, g) in self.weights.iter_mut().zip(&grad) {
                *w -= lr * (g / total_weight + self.params.l2 * *w);
            }
            self.bias -= lr * grad_bias / total_weight;
        }

        Ok(())
    }

    fn predict_probability(&self, row: &[f64]) -> f64 {
        sigmoid(self.logit(row))
    }

    fn input_scaling(&self) -> InputScaling {
        InputScaling::Standardized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separable_data() {
        let features: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64 / 10.0 - 2.0]).collect();
        let labels: Vec<bool> = (0..40).map(|i| i >= 20).collect();

        let mut model = LogisticRegression::new(LogisticParams::default());
        model.fit(&features, &labels).unwrap();

        assert!(model.weights()[0] > 0.0);
        assert!(model.predict_probability(&[1.5]) > 0.7);
        assert!(model.predict_probability(&[-1.5]) < 0.3);
    }

    #[test]
    fn test_balanced_weights_raise_minority_scores() {
        let features: Vec<Vec<f64>> = (0..100).map(|i| vec![(i % 10) as f64 / 5.0]).collect();
        let labels: Vec<bool> = (0..100).map(|i| i % 10 == 9 && i < 50).collect();

        let mut plain = LogisticRegression::new(LogisticParams::default());
        plain.fit(&features, &labels).unwrap();
        let mut balanced = LogisticRegression::new(LogisticParams {
            balanced: true,
            ..LogisticParams::default()
        });
        balanced.fit(&features, &labels).unwrap();

        let point = [9.0 / 5.0];
        assert!(balanced.predict_probability(&point) > plain.predict_probability(&point));
    }

    #[test]
    fn test_training_is_deterministic() {
        let features = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.5]];
        let labels = vec![false, true, true];
        let mut a = LogisticRegression::new(LogisticParams::default());
        let mut b = LogisticRegression::new(LogisticParams::default());
        a.fit(&features, &labels).unwrap();
        b.fit(&features, &labels).unwrap();
        assert_eq!(a, b);
    }
}
