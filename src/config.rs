//! Configuration management for the scoring engine

use crate::error::{PipelineError, Result};
use crate::models::{default_base_models, BaseModelConfig, LogisticParams};
use crate::types::DecisionThresholds;
use anyhow::Context;
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub features: FeatureConfig,
    pub split: SplitConfig,
    pub models: ModelsConfig,
    pub detection: DetectionConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming transactions
    pub transaction_subject: String,
    /// Subject for outgoing scoring decisions
    pub decision_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            transaction_subject: "transactions".to_string(),
            decision_subject: "fraud.decisions".to_string(),
        }
    }
}

/// Feature engineering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Rolling window sizes in days, strictly increasing
    pub temporal_windows: Vec<u32>,
    /// Window whose mean drives the amount deviation features
    pub deviation_window_days: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            temporal_windows: vec![1, 7, 28],
            deviation_window_days: 28,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.temporal_windows.is_empty() {
            return Err(PipelineError::invalid_config("temporal_windows is empty"));
        }
        if self.temporal_windows.contains(&0) {
            return Err(PipelineError::invalid_config("temporal_windows must be positive"));
        }
        if self.temporal_windows.windows(2).any(|w| w[1] <= w[0]) {
            return Err(PipelineError::invalid_config(format!(
                "temporal_windows must be strictly increasing, got {:?}",
                self.temporal_windows
            )));
        }
        if !self.temporal_windows.contains(&self.deviation_window_days) {
            return Err(PipelineError::invalid_config(format!(
                "deviation_window_days {} is not one of {:?}",
                self.deviation_window_days, self.temporal_windows
            )));
        }
        Ok(())
    }
}

/// Chronological partition ratios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train: f64,
    pub validation: f64,
    pub test: f64,
    /// Minimum rows of each class every partition must hold
    pub min_class_count: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train: 0.7,
            validation: 0.15,
            test: 0.15,
            min_class_count: 1,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [
            ("train", self.train),
            ("validation", self.validation),
            ("test", self.test),
        ] {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(PipelineError::invalid_config(format!(
                    "split.{name} must be in (0, 1), got {ratio}"
                )));
            }
        }
        if self.min_class_count == 0 {
            return Err(PipelineError::invalid_config(
                "split.min_class_count must be at least 1",
            ));
        }
        let total = self.train + self.validation + self.test;
        if (total - 1.0).abs() > 1e-9 {
            return Err(PipelineError::invalid_config(format!(
                "split ratios must sum to 1.0, got {total}"
            )));
        }
        Ok(())
    }
}

/// Model training and artifact configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Exported ensemble artifact (JSON)
    pub artifact_path: String,
    /// Reference amount distribution for live percentiles (JSON)
    pub reference_path: String,
    /// Base seed; each base learner derives its own from it
    pub seed: u64,
    /// Base learners in ensemble order
    pub base_models: Vec<BaseModelConfig>,
    /// Meta-classifier settings
    pub meta: LogisticParams,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            artifact_path: "models/artifact.json".to_string(),
            reference_path: "models/reference.json".to_string(),
            seed: 42,
            base_models: default_base_models(),
            meta: LogisticParams::meta(),
        }
    }
}

impl ModelsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_models.is_empty() {
            return Err(PipelineError::invalid_config("models.base_models is empty"));
        }
        let mut names = HashSet::new();
        for model in &self.base_models {
            if !names.insert(model.name.as_str()) {
                return Err(PipelineError::invalid_config(format!(
                    "duplicate base model name {}",
                    model.name
                )));
            }
        }
        Ok(())
    }
}

/// Detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Probability at or above which a transaction is blocked
    pub high_risk: f64,
    /// Probability at or above which a transaction is sent to review
    pub medium_risk: f64,
    /// Number of risk factors reported per decision
    pub risk_factor_count: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let thresholds = DecisionThresholds::default();
        Self {
            high_risk: thresholds.high_risk,
            medium_risk: thresholds.medium_risk,
            risk_factor_count: 5,
        }
    }
}

impl DetectionConfig {
    pub fn thresholds(&self) -> Result<DecisionThresholds> {
        DecisionThresholds::new(self.medium_risk, self.high_risk)
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads for batch features and concurrent scoring requests
    pub workers: usize,
    /// Lock shards for the live window stores
    pub shards: usize,
    /// Processing timeout in milliseconds
    pub timeout_ms: u64,
    /// Optional JSON-lines history replayed into the live stores at startup
    pub history_path: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            shards: 16,
            timeout_ms: 1000,
            history_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let config: AppConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Check every cross-field rule; the first violation is returned.
    pub fn validate(&self) -> Result<()> {
        self.features.validate()?;
        self.split.validate()?;
        self.models.validate()?;
        self.detection.thresholds()?;
        if self.pipeline.workers == 0 {
            return Err(PipelineError::invalid_config("pipeline.workers must be > 0"));
        }
        if self.pipeline.shards == 0 {
            return Err(PipelineError::invalid_config("pipeline.shards must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LearnerSpec;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.features.temporal_windows, vec![1, 7, 28]);
        assert_eq!(config.detection.high_risk, 0.8);
        assert_eq!(config.detection.medium_risk, 0.3);
        assert_eq!(config.models.base_models.len(), 3);
        assert_eq!(config.pipeline.shards, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_window_rules() {
        let mut features = FeatureConfig::default();
        features.temporal_windows = vec![];
        assert!(features.validate().is_err());

        features.temporal_windows = vec![7, 1, 28];
        assert!(features.validate().is_err());

        features.temporal_windows = vec![0, 28];
        assert!(features.validate().is_err());

        features.temporal_windows = vec![1, 7];
        assert!(features.validate().is_err(), "deviation window 28 missing");
    }

    #[test]
    fn test_split_and_threshold_rules() {
        let mut config = AppConfig::default();
        config.split.test = 0.2;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfiguration(_))
        ));

        let mut config = AppConfig::default();
        config.detection.medium_risk = 0.9;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.shards = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.split.min_class_count = 0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[features]
temporal_windows = [1, 14]
deviation_window_days = 14

[detection]
high_risk = 0.9
medium_risk = 0.5

[[models.base_models]]
name = "forest"
[models.base_models.learner]
kind = "random_forest"
n_trees = 10
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.features.temporal_windows, vec![1, 14]);
        assert_eq!(config.detection.high_risk, 0.9);
        assert_eq!(config.detection.risk_factor_count, 5);
        assert_eq!(config.split, SplitConfig::default());
        assert_eq!(config.models.base_models.len(), 1);
        match &config.models.base_models[0].learner {
            LearnerSpec::RandomForest(p) => assert_eq!(p.n_trees, 10),
            other => panic!("unexpected learner {other:?}"),
        }
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/config.toml");
        let config = AppConfig::load_from_path(path).unwrap();
        assert_eq!(config.models.base_models.len(), 3);
        assert_eq!(config.models.meta.epochs, 1000);
        assert_eq!(config.nats.decision_subject, "fraud.decisions");
    }

    #[test]
    fn test_load_rejects_invalid_thresholds() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[detection]\nhigh_risk = 0.2\nmedium_risk = 0.4").unwrap();
        assert!(AppConfig::load_from_path(file.path()).is_err());
    }
}
