//! Stacked ensemble: heterogeneous base learners fit on the train partition,
//! a logistic meta-model fit on their validation-partition probabilities.
//!
//! The meta-model only ever sees a [`MetaTrainingSet`], an owned copy of the
//! base predictions captured on validation rows. Nothing it is fit on can
//! come from the rows the base learners were trained on.

use super::evaluation::{EvaluationReport, ModelEvaluation};
use super::logistic::{LogisticParams, LogisticRegression};
use super::scaler::StandardScaler;
use super::split::TemporalSplit;
use super::{BaseModelConfig, Classifier, InputScaling, Learner};
use crate::config::{ModelsConfig, SplitConfig};
use crate::error::{Partition, PipelineError, Result};
use crate::features::{FeatureSchema, FeatureVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};
use uuid::Uuid;

/// A trained base learner under its configured name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseModel {
    pub name: String,
    pub learner: Learner,
}

impl BaseModel {
    fn predict(&self, raw: &[f64], standardized: &[f64]) -> f64 {
        match self.learner.input_scaling() {
            InputScaling::Raw => self.learner.predict_probability(raw),
            InputScaling::Standardized => self.learner.predict_probability(standardized),
        }
    }
}

/// Base-model probabilities on held-out rows, one column per base model in
/// ensemble order.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaTrainingSet {
    model_names: Vec<String>,
    predictions: Vec<Vec<f64>>,
    labels: Vec<bool>,
}

impl MetaTrainingSet {
    pub fn capture(
        base_models: &[BaseModel],
        scaler: &StandardScaler,
        features: &[Vec<f64>],
        labels: &[bool],
    ) -> Self {
        let predictions = features
            .iter()
            .map(|row| {
                let standardized = scaler.transform(row);
                base_models
                    .iter()
                    .map(|m| m.predict(row, &standardized))
                    .collect()
            })
            .collect();

        Self {
            model_names: base_models.iter().map(|m| m.name.clone()).collect(),
            predictions,
            labels: labels.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn model_names(&self) -> &[String] {
        &self.model_names
    }

    pub fn predictions(&self) -> &[Vec<f64>] {
        &self.predictions
    }

    pub fn labels(&self) -> &[bool] {
        &self.labels
    }
}

/// Fit every configured base learner on the same training rows, one thread
/// per learner. Returns them in configuration order.
pub fn fit_base_models(
    configs: &[BaseModelConfig],
    seed: u64,
    scaler: &StandardScaler,
    features: &[Vec<f64>],
    labels: &[bool],
) -> Result<Vec<BaseModel>> {
    if configs.is_empty() {
        return Err(PipelineError::invalid_config("no base models configured"));
    }
    let standardized = scaler.transform_all(features);
    let standardized = &standardized;

    let results: Vec<Result<BaseModel>> = thread::scope(|scope| {
        let handles: Vec<_> = configs
            .iter()
            .enumerate()
            .map(|(idx, config)| {
                scope.spawn(move || -> Result<BaseModel> {
                    let mut learner = Learner::from_spec(&config.learner, seed.wrapping_add(idx as u64));
                    let rows = match learner.input_scaling() {
                        InputScaling::Raw => features,
                        InputScaling::Standardized => standardized.as_slice(),
                    };
                    learner.fit(rows, labels)?;
                    debug!(model = %config.name, rows = rows.len(), "Base model fitted");
                    Ok(BaseModel {
                        name: config.name.clone(),
                        learner,
                    })
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    results.into_iter().collect()
}

/// Fit the meta-classifier on captured validation predictions.
pub fn fit_meta(set: &MetaTrainingSet, params: &LogisticParams) -> Result<LogisticRegression> {
    let mut meta = LogisticRegression::new(params.clone());
    meta.fit(&set.predictions, &set.labels)?;
    Ok(meta)
}

/// Output of one ensemble prediction
#[derive(Debug, Clone, PartialEq)]
pub struct EnsemblePrediction {
    /// Meta-model probability
    pub probability: f64,
    /// Base-model probabilities in ensemble order
    pub base_probabilities: Vec<f64>,
}

/// Immutable trained ensemble
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleArtifact {
    version: String,
    created_at: DateTime<Utc>,
    feature_schema: Arc<FeatureSchema>,
    scaler: StandardScaler,
    base_models: Vec<BaseModel>,
    meta_model: LogisticRegression,
}

/// Plain-data form of an [`EnsembleArtifact`] for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactData {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub feature_schema: FeatureSchema,
    pub scaler: StandardScaler,
    pub base_models: Vec<BaseModel>,
    pub meta_model: LogisticRegression,
}

impl EnsembleArtifact {
    /// Assemble a freshly trained artifact under a new version id.
    pub fn new(
        feature_schema: Arc<FeatureSchema>,
        scaler: StandardScaler,
        base_models: Vec<BaseModel>,
        meta_model: LogisticRegression,
    ) -> Result<Self> {
        let artifact = Self {
            version: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            feature_schema,
            scaler,
            base_models,
            meta_model,
        };
        artifact.check_consistency()?;
        Ok(artifact)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn feature_schema(&self) -> &Arc<FeatureSchema> {
        &self.feature_schema
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn base_models(&self) -> &[BaseModel] {
        &self.base_models
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.base_models.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn meta_model(&self) -> &LogisticRegression {
        &self.meta_model
    }

    pub fn export(&self) -> ArtifactData {
        ArtifactData {
            version: self.version.clone(),
            created_at: self.created_at,
            feature_schema: (*self.feature_schema).clone(),
            scaler: self.scaler.clone(),
            base_models: self.base_models.clone(),
            meta_model: self.meta_model.clone(),
        }
    }

    /// Rebuild an artifact from exported data, rejecting inconsistent input.
    pub fn import(data: ArtifactData) -> Result<Self> {
        data.feature_schema.verify_fingerprint()?;
        let scaler = StandardScaler::from_parts(data.scaler.mean().to_vec(), data.scaler.scale().to_vec())?;
        let artifact = Self {
            version: data.version,
            created_at: data.created_at,
            feature_schema: Arc::new(data.feature_schema),
            scaler,
            base_models: data.base_models,
            meta_model: data.meta_model,
        };
        artifact.check_consistency()?;
        Ok(artifact)
    }

    fn check_consistency(&self) -> Result<()> {
        let width = self.feature_schema.len();
        if self.scaler.len() != width {
            return Err(PipelineError::InvalidArtifact(format!(
                "scaler covers {} features, schema has {width}",
                self.scaler.len()
            )));
        }
        if self.base_models.is_empty() {
            return Err(PipelineError::InvalidArtifact("no base models".to_string()));
        }
        let mut names = HashSet::new();
        for model in &self.base_models {
            if !names.insert(model.name.as_str()) {
                return Err(PipelineError::InvalidArtifact(format!(
                    "duplicate base model name {}",
                    model.name
                )));
            }
            if !model.learner.accepts_width(width) {
                return Err(PipelineError::InvalidArtifact(format!(
                    "base model {} does not accept {width} features",
                    model.name
                )));
            }
        }
        if self.meta_model.weights().len() != self.base_models.len() {
            return Err(PipelineError::InvalidArtifact(format!(
                "meta model takes {} inputs, ensemble has {} base models",
                self.meta_model.weights().len(),
                self.base_models.len()
            )));
        }
        Ok(())
    }

    /// Score a feature vector; its schema must equal the training schema.
    pub fn predict(&self, features: &FeatureVector) -> Result<EnsemblePrediction> {
        self.feature_schema.ensure_matches(features.schema())?;
        Ok(self.predict_row(features.values()))
    }

    pub fn predict_probability(&self, features: &FeatureVector) -> Result<f64> {
        Ok(self.predict(features)?.probability)
    }

    /// Rows must already be laid out in the artifact's schema order.
    pub(crate) fn predict_row(&self, row: &[f64]) -> EnsemblePrediction {
        let standardized = self.scaler.transform(row);
        let base_probabilities: Vec<f64> = self
            .base_models
            .iter()
            .map(|m| m.predict(row, &standardized))
            .collect();
        let probability = self
            .meta_model
            .predict_probability(&base_probabilities)
            .clamp(0.0, 1.0);
        EnsemblePrediction {
            probability,
            base_probabilities,
        }
    }

    /// Metrics for the ensemble and each base model on labelled rows.
    pub fn evaluate(&self, rows: &[Vec<f64>], labels: &[bool], threshold: f64) -> EvaluationReport {
        let predictions: Vec<EnsemblePrediction> = rows.iter().map(|r| self.predict_row(r)).collect();
        let ensemble_probs: Vec<f64> = predictions.iter().map(|p| p.probability).collect();

        let base_models = self
            .base_models
            .iter()
            .enumerate()
            .map(|(idx, model)| {
                let probs: Vec<f64> = predictions.iter().map(|p| p.base_probabilities[idx]).collect();
                ModelEvaluation::compute(&model.name, &probs, labels, threshold)
            })
            .collect();

        EvaluationReport {
            test_size: rows.len(),
            positives: labels.iter().filter(|&&y| y).count(),
            threshold,
            ensemble: ModelEvaluation::compute("stacked_ensemble", &ensemble_probs, labels, threshold),
            base_models,
        }
    }
}

/// Result of the full train / validate / test protocol
#[derive(Debug, Clone)]
pub struct TrainedEnsemble {
    pub artifact: EnsembleArtifact,
    pub split: TemporalSplit,
    pub report: EvaluationReport,
}

impl TrainedEnsemble {
    /// Split chronologically, fit base learners on train, the meta-model on
    /// validation predictions, and evaluate on test.
    ///
    /// `rows`, `labels` and `timestamps` are parallel and sorted by time.
    pub fn train(
        schema: Arc<FeatureSchema>,
        rows: &[Vec<f64>],
        labels: &[bool],
        timestamps: &[DateTime<Utc>],
        models: &ModelsConfig,
        split_config: &SplitConfig,
        threshold: f64,
    ) -> Result<Self> {
        if rows.len() != labels.len() || rows.len() != timestamps.len() {
            return Err(PipelineError::invalid_config(format!(
                "{} rows, {} labels, {} timestamps",
                rows.len(),
                labels.len(),
                timestamps.len()
            )));
        }
        if let Some(row) = rows.iter().find(|r| r.len() != schema.len()) {
            let actual: Vec<String> = (0..row.len()).map(|i| format!("#{i}")).collect();
            return Err(PipelineError::schema_mismatch(&schema.names, &actual));
        }

        let split = TemporalSplit::compute(timestamps, split_config)?;
        for (partition, range) in [
            (Partition::Train, &split.train),
            (Partition::Validation, &split.validation),
            (Partition::Test, &split.test),
        ] {
            check_classes(partition, &labels[range.clone()], split_config.min_class_count)?;
        }
        info!(
            train = split.train.len(),
            validation = split.validation.len(),
            test = split.test.len(),
            "Temporal split computed"
        );

        let (train_rows, train_labels) = slice(rows, labels, &split.train);
        let scaler = StandardScaler::fit(train_rows)?;
        let base_models = fit_base_models(&models.base_models, models.seed, &scaler, train_rows, train_labels)?;
        info!(models = base_models.len(), "Base models fitted on train partition");

        let (val_rows, val_labels) = slice(rows, labels, &split.validation);
        let meta_set = MetaTrainingSet::capture(&base_models, &scaler, val_rows, val_labels);
        let meta_model = fit_meta(&meta_set, &models.meta)?;
        info!(rows = meta_set.len(), "Meta model fitted on validation predictions");

        let artifact = EnsembleArtifact::new(schema, scaler, base_models, meta_model)?;
        let (test_rows, test_labels) = slice(rows, labels, &split.test);
        let report = artifact.evaluate(test_rows, test_labels, threshold);

        Ok(Self {
            artifact,
            split,
            report,
        })
    }
}

fn slice<'a>(rows: &'a [Vec<f64>], labels: &'a [bool], range: &Range<usize>) -> (&'a [Vec<f64>], &'a [bool]) {
    (&rows[range.clone()], &labels[range.clone()])
}

fn check_classes(partition: Partition, labels: &[bool], required: usize) -> Result<()> {
    let positives = labels.iter().filter(|&&y| y).count();
    let negatives = labels.len() - positives;
    if positives < required || negatives < required {
        return Err(PipelineError::InsufficientPartitionData {
            partition,
            positives,
            negatives,
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoostingParams, ForestParams, LearnerSpec};
    use chrono::{Duration, TimeZone};

    fn small_models() -> ModelsConfig {
        ModelsConfig {
            base_models: vec![
                BaseModelConfig {
                    name: "lr".to_string(),
                    learner: LearnerSpec::LogisticRegression(LogisticParams::default()),
                },
                BaseModelConfig {
                    name: "rf".to_string(),
                    learner: LearnerSpec::RandomForest(ForestParams {
                        n_trees: 5,
                        ..ForestParams::default()
                    }),
                },
                BaseModelConfig {
                    name: "gb".to_string(),
                    learner: LearnerSpec::GradientBoosting(BoostingParams {
                        n_estimators: 10,
                        ..BoostingParams::default()
                    }),
                },
            ],
            ..ModelsConfig::default()
        }
    }

    fn schema() -> Arc<FeatureSchema> {
        Arc::new(FeatureSchema::new(vec!["a".to_string(), "b".to_string()]))
    }

    /// Fraud when `a` is large; every fifth row is fraudulent.
    fn dataset(n: usize) -> (Vec<Vec<f64>>, Vec<bool>, Vec<DateTime<Utc>>) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let labels: Vec<bool> = (0..n).map(|i| i % 5 == 0).collect();
        let rows = labels
            .iter()
            .enumerate()
            .map(|(i, &y)| {
                let noise = (i % 3) as f64;
                vec![if y { 50.0 + noise } else { 10.0 + noise }, (i % 11) as f64]
            })
            .collect();
        let timestamps = (0..n).map(|i| start + Duration::minutes(i as i64)).collect();
        (rows, labels, timestamps)
    }

    fn trained() -> TrainedEnsemble {
        let (rows, labels, ts) = dataset(400);
        TrainedEnsemble::train(
            schema(),
            &rows,
            &labels,
            &ts,
            &small_models(),
            &SplitConfig::default(),
            0.3,
        )
        .unwrap()
    }

    fn vector(values: Vec<f64>) -> FeatureVector {
        FeatureVector::new(schema(), values).unwrap()
    }

    #[test]
    fn test_train_and_predict() {
        let trained = trained();
        let artifact = &trained.artifact;

        assert_eq!(trained.split.sizes(), (280, 60, 60));
        assert_eq!(artifact.model_names(), vec!["lr", "rf", "gb"]);

        let fraud = artifact.predict(&vector(vec![51.0, 3.0])).unwrap();
        let legit = artifact.predict(&vector(vec![11.0, 3.0])).unwrap();
        assert_eq!(fraud.base_probabilities.len(), 3);
        assert!(fraud.probability > legit.probability);
        assert!((0.0..=1.0).contains(&fraud.probability));
        assert!(trained.report.ensemble.roc_auc > 0.9);
        assert_eq!(trained.report.base_models.len(), 3);
    }

    #[test]
    fn test_meta_fit_isolated_from_training_rows() {
        let (mut rows, labels, _) = dataset(200);
        let (train, val) = (0..140, 140..170);
        let scaler = StandardScaler::fit(&rows[train.clone()]).unwrap();
        let base = fit_base_models(
            &small_models().base_models,
            42,
            &scaler,
            &rows[train.clone()],
            &labels[train.clone()],
        )
        .unwrap();
        let set = MetaTrainingSet::capture(&base, &scaler, &rows[val.clone()], &labels[val]);
        let before = fit_meta(&set, &LogisticParams::meta()).unwrap();

        for row in &mut rows[train] {
            row.iter_mut().for_each(|x| *x = -1000.0);
        }
        let after = fit_meta(&set, &LogisticParams::meta()).unwrap();

        assert_eq!(before, after);
        assert_eq!(set.model_names(), &["lr", "rf", "gb"]);
        assert_eq!(set.len(), 30);
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let trained = trained();
        let reordered = FeatureVector::from_pairs(vec![("b".to_string(), 3.0), ("a".to_string(), 51.0)]);
        assert!(matches!(
            trained.artifact.predict(&reordered),
            Err(PipelineError::SchemaMismatch { .. })
        ));

        let truncated = FeatureVector::from_pairs(vec![("a".to_string(), 51.0)]);
        assert!(matches!(
            trained.artifact.predict(&truncated),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_export_import_round_trip() {
        let trained = trained();
        let json = serde_json::to_string(&trained.artifact.export()).unwrap();
        let data: ArtifactData = serde_json::from_str(&json).unwrap();
        let restored = EnsembleArtifact::import(data).unwrap();

        assert_eq!(restored.version(), trained.artifact.version());
        for values in [vec![51.0, 3.0], vec![11.0, 7.0], vec![30.0, 0.0]] {
            let a = trained.artifact.predict(&vector(values.clone())).unwrap();
            let b = restored.predict(&vector(values)).unwrap();
            assert!((a.probability - b.probability).abs() < 1e-12);
            assert_eq!(a.base_probabilities.len(), b.base_probabilities.len());
        }
    }

    #[test]
    fn test_import_rejects_inconsistent_data() {
        let trained = trained();

        let mut data = trained.artifact.export();
        data.base_models.pop();
        assert!(matches!(
            EnsembleArtifact::import(data),
            Err(PipelineError::InvalidArtifact(_))
        ));

        let mut data = trained.artifact.export();
        data.feature_schema.names.reverse();
        assert!(matches!(
            EnsembleArtifact::import(data),
            Err(PipelineError::InvalidArtifact(_))
        ));
    }

    #[test]
    fn test_single_class_partition_is_fatal() {
        let (rows, mut labels, ts) = dataset(400);
        // no fraud in the test partition
        labels[340..].iter_mut().for_each(|y| *y = false);
        let err = TrainedEnsemble::train(
            schema(),
            &rows,
            &labels,
            &ts,
            &small_models(),
            &SplitConfig::default(),
            0.3,
        )
        .unwrap_err();

        match err {
            PipelineError::InsufficientPartitionData {
                partition,
                positives,
                ..
            } => {
                assert_eq!(partition, Partition::Test);
                assert_eq!(positives, 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_zero_class_floor_cannot_hide_missing_class() {
        let (rows, mut labels, ts) = dataset(400);
        labels[340..].iter_mut().for_each(|y| *y = false);
        let split = SplitConfig {
            min_class_count: 0,
            ..SplitConfig::default()
        };
        let err = TrainedEnsemble::train(schema(), &rows, &labels, &ts, &small_models(), &split, 0.3)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    }
}
