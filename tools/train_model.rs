//! Offline trainer
//!
//! Builds causal features for a labelled transaction history, trains the
//! stacked ensemble and writes the artifact and reference distribution to the
//! paths named in the configuration.
//!
//! Usage: train_model [config.toml] [transactions.jsonl]
//!
//! Without a transaction file a synthetic history is generated.

use anyhow::{Context, Result};
use fraud_scoring_engine::simulation::{SimulationConfig, SyntheticGenerator};
use fraud_scoring_engine::{persistence, train_from_transactions, AppConfig};
use std::time::Instant;
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("train_model=info".parse()?)
                .add_directive("fraud_scoring_engine=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::default(),
    };

    let transactions = match args.get(2) {
        Some(path) => {
            let txs = persistence::read_transactions(path)?;
            info!(path = %path, transactions = txs.len(), "Loaded transaction history");
            txs
        }
        None => {
            info!("No transaction file given, generating synthetic history");
            SyntheticGenerator::new(SimulationConfig {
                seed: config.models.seed,
                ..SimulationConfig::default()
            })
            .generate()
        }
    };

    let start = Instant::now();
    let outcome = train_from_transactions(transactions, &config).context("Training failed")?;
    info!(
        model_version = %outcome.artifact.version(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        roc_auc = outcome.report.ensemble.roc_auc,
        average_precision = outcome.report.ensemble.average_precision,
        "Training complete"
    );

    persistence::save_artifact(&config.models.artifact_path, &outcome.artifact)?;
    persistence::save_reference(&config.models.reference_path, &outcome.reference)?;
    info!(
        artifact = %config.models.artifact_path,
        reference = %config.models.reference_path,
        "Artifacts written"
    );

    Ok(())
}
