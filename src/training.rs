//! Offline path: labelled transactions to feature rows to a trained ensemble

use crate::config::{AppConfig, FeatureConfig};
use crate::error::{PipelineError, Result};
use crate::features::{
    FeatureSchema, ReferenceDistribution, RunningRank, TemporalFeatureEngine,
    TransactionFeatureBuilder,
};
use crate::models::{EnsembleArtifact, EvaluationReport, TemporalSplit, TrainedEnsemble};
use crate::types::{sort_chronologically, Transaction};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Feature rows for a chronologically sorted, labelled batch.
#[derive(Debug, Clone)]
pub struct FeatureDataset {
    pub schema: Arc<FeatureSchema>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub transaction_ids: Vec<String>,
    pub amounts: Vec<f64>,
}

impl FeatureDataset {
    /// Validate, sort and featurize `transactions`. Every record must carry
    /// a label. Window aggregation runs on `workers` threads.
    pub fn from_transactions(
        mut transactions: Vec<Transaction>,
        config: &FeatureConfig,
        workers: usize,
    ) -> Result<Self> {
        if transactions.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }
        for tx in &transactions {
            tx.validate()?;
            if tx.label.is_none() {
                return Err(PipelineError::UnlabeledTransaction(tx.transaction_id.clone()));
            }
        }

        let builder = TransactionFeatureBuilder::new(config)?;
        sort_chronologically(&mut transactions);
        let temporal = TemporalFeatureEngine::process_batch(builder.windows(), &transactions, workers)?;

        let amounts: Vec<f64> = transactions.iter().map(|t| t.amount).collect();
        let percentiles = RunningRank::causal_percentiles(&amounts);
        let mut rows = Vec::with_capacity(transactions.len());
        for ((tx, features), percentile) in transactions.iter().zip(&temporal).zip(percentiles) {
            rows.push(builder.build(tx, features, percentile)?.into_values());
        }

        let labels = transactions.iter().map(|t| t.label == Some(true)).collect();
        let timestamps = transactions.iter().map(|t| t.timestamp).collect();
        let transaction_ids = transactions.into_iter().map(|t| t.transaction_id).collect();

        Ok(Self {
            schema: Arc::clone(builder.schema()),
            rows,
            labels,
            timestamps,
            transaction_ids,
            amounts,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&y| y).count()
    }
}

/// Everything a training run produces
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifact: EnsembleArtifact,
    pub report: EvaluationReport,
    pub split: TemporalSplit,
    /// Train-partition amounts, for live percentile ranks
    pub reference: ReferenceDistribution,
}

/// Featurize, train the stacked ensemble and evaluate it on the test partition.
pub fn train_from_transactions(
    transactions: Vec<Transaction>,
    config: &AppConfig,
) -> Result<TrainingOutcome> {
    config.validate()?;
    let thresholds = config.detection.thresholds()?;

    let dataset = FeatureDataset::from_transactions(transactions, &config.features, config.pipeline.workers)?;
    info!(
        rows = dataset.len(),
        frauds = dataset.positives(),
        features = dataset.schema.len(),
        "Feature dataset built"
    );

    let trained = TrainedEnsemble::train(
        Arc::clone(&dataset.schema),
        &dataset.rows,
        &dataset.labels,
        &dataset.timestamps,
        &config.models,
        &config.split,
        thresholds.medium_risk,
    )?;
    trained.report.log();

    let reference = ReferenceDistribution::from_amounts(dataset.amounts[trained.split.train.clone()].iter().copied());

    Ok(TrainingOutcome {
        artifact: trained.artifact,
        report: trained.report,
        split: trained.split,
        reference,
    })
}
