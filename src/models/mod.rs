//! Classifiers and the stacked ensemble built from them

pub mod boosting;
pub mod ensemble;
pub mod evaluation;
pub mod forest;
pub mod logistic;
pub mod scaler;
pub mod split;
pub mod tree;

pub use boosting::{BoostingParams, GradientBoosting};
pub use ensemble::{
    fit_base_models, fit_meta, ArtifactData, BaseModel, EnsembleArtifact, EnsemblePrediction,
    MetaTrainingSet, TrainedEnsemble,
};
pub use evaluation::{EvaluationReport, ModelEvaluation};
pub use forest::{ForestParams, RandomForest};
pub use logistic::{LogisticParams, LogisticRegression};
pub use scaler::StandardScaler;
pub use split::TemporalSplit;

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Which representation of the features a learner consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputScaling {
    /// Raw feature values (scale-insensitive learners such as tree ensembles)
    Raw,
    /// Values standardized with the training-partition scaler
    Standardized,
}

/// A binary classifier producing a fraud probability.
pub trait Classifier {
    /// Fit on rows of features and their labels.
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool]) -> Result<()>;

    /// Probability of the positive (fraud) class, in [0, 1].
    fn predict_probability(&self, row: &[f64]) -> f64;

    fn input_scaling(&self) -> InputScaling;
}

/// The concrete learners an ensemble can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Learner {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
}

impl Learner {
    /// Untrained learner for a configured spec
    pub fn from_spec(spec: &LearnerSpec, seed: u64) -> Self {
        match spec {
            LearnerSpec::LogisticRegression(p) => {
                Learner::LogisticRegression(LogisticRegression::new(p.clone()))
            }
            LearnerSpec::RandomForest(p) => Learner::RandomForest(RandomForest::new(p.clone(), seed)),
            LearnerSpec::GradientBoosting(p) => {
                Learner::GradientBoosting(GradientBoosting::new(p.clone(), seed))
            }
        }
    }

    /// Whether a trained learner can consume rows of `width` features
    pub fn accepts_width(&self, width: usize) -> bool {
        match self {
            Learner::LogisticRegression(m) => m.weights().len() == width,
            Learner::RandomForest(m) => m.max_feature_index().map_or(true, |i| i < width),
            Learner::GradientBoosting(m) => m.max_feature_index().map_or(true, |i| i < width),
        }
    }
}

impl Classifier for Learner {
    fn fit(&mut self, features: &[Vec<f64>], labels: &[bool]) -> Result<()> {
        match self {
            Learner::LogisticRegression(m) => m.fit(features, labels),
            Learner::RandomForest(m) => m.fit(features, labels),
            Learner::GradientBoosting(m) => m.fit(features, labels),
        }
    }

    fn predict_probability(&self, row: &[f64]) -> f64 {
        match self {
            Learner::LogisticRegression(m) => m.predict_probability(row),
            Learner::RandomForest(m) => m.predict_probability(row),
            Learner::GradientBoosting(m) => m.predict_probability(row),
        }
    }

    fn input_scaling(&self) -> InputScaling {
        match self {
            Learner::LogisticRegression(m) => m.input_scaling(),
            Learner::RandomForest(m) => m.input_scaling(),
            Learner::GradientBoosting(m) => m.input_scaling(),
        }
    }
}

/// Hyper-parameters for one base learner, as read from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearnerSpec {
    LogisticRegression(LogisticParams),
    RandomForest(ForestParams),
    GradientBoosting(BoostingParams),
}

/// A named base learner in the ensemble's fixed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseModelConfig {
    pub name: String,
    pub learner: LearnerSpec,
}

/// Default heterogeneous base set: linear, bagged trees, boosted trees
pub fn default_base_models() -> Vec<BaseModelConfig> {
    vec![
        BaseModelConfig {
            name: "logistic_regression".to_string(),
            learner: LearnerSpec::LogisticRegression(LogisticParams {
                balanced: true,
                ..LogisticParams::default()
            }),
        },
        BaseModelConfig {
            name: "random_forest".to_string(),
            learner: LearnerSpec::RandomForest(ForestParams::default()),
        },
        BaseModelConfig {
            name: "gradient_boosting".to_string(),
            learner: LearnerSpec::GradientBoosting(BoostingParams::default()),
        },
    ]
}

/// Numerically stable logistic function
pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Shared shape checks for `Classifier::fit`; returns the row width.
pub(crate) fn check_training_input(features: &[Vec<f64>], labels: &[bool]) -> Result<usize> {
    if features.is_empty() {
        return Err(PipelineError::EmptyDataset);
    }
    if features.len() != labels.len() {
        return Err(PipelineError::invalid_config(format!(
            "{} feature rows but {} labels",
            features.len(),
            labels.len()
        )));
    }
    let width = features[0].len();
    if features.iter().any(|row| row.len() != width) {
        return Err(PipelineError::invalid_config("feature rows have unequal widths"));
    }
    Ok(width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(!sigmoid(-800.0).is_nan());
    }

    #[test]
    fn test_input_checks() {
        assert!(matches!(
            check_training_input(&[], &[]),
            Err(PipelineError::EmptyDataset)
        ));
        assert!(check_training_input(&[vec![1.0]], &[true, false]).is_err());
        assert!(check_training_input(&[vec![1.0], vec![1.0, 2.0]], &[true, false]).is_err());
        assert_eq!(check_training_input(&[vec![1.0, 2.0]], &[true]).unwrap(), 2);
    }

    #[test]
    fn test_learner_spec_from_toml_like_json() {
        let json = r#"{"name":"rf","learner":{"kind":"random_forest","n_trees":5}}"#;
        let cfg: BaseModelConfig = serde_json::from_str(json).unwrap();
        match cfg.learner {
            LearnerSpec::RandomForest(p) => {
                assert_eq!(p.n_trees, 5);
                assert_eq!(p.max_depth, ForestParams::default().max_depth);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }
}
