//! Fraud Scoring Engine Library
//!
//! Causal per-entity feature engineering over a transaction stream, and a
//! stacked ensemble that turns those features into a fraud probability and a
//! decision. Batch training and live scoring share the same window store and
//! feature builder, so a transaction is featurized identically in both.

pub mod config;
pub mod consumer;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod producer;
pub mod simulation;
pub mod training;
pub mod types;

pub use config::AppConfig;
pub use error::{PipelineError, Result};
pub use features::{FeatureSchema, FeatureVector, TemporalFeatureEngine, TransactionFeatureBuilder};
pub use models::{EnsembleArtifact, TrainedEnsemble};
pub use pipeline::ScoringPipeline;
pub use training::{train_from_transactions, FeatureDataset, TrainingOutcome};
pub use types::{Decision, ScoringDecision, ScoringResponse, Transaction};
