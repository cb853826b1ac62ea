//! Fraud Scoring Engine - Main Entry Point
//!
//! Consumes transactions from NATS, scores them against live window state with
//! the stacked ensemble, and publishes a decision for every transaction.

use anyhow::{Context, Result};
use fraud_scoring_engine::{
    config::AppConfig,
    consumer::{decode_transaction, TransactionConsumer},
    metrics::{MetricsReporter, PipelineMetrics},
    persistence,
    pipeline::ScoringPipeline,
    producer::DecisionProducer,
    PipelineError,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("fraud_scoring_engine={}", config.logging.level).parse()?);

    if config.logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    init_logging(&config)?;
    info!("Starting Fraud Scoring Engine");
    info!(
        windows = ?config.features.temporal_windows,
        medium_risk = config.detection.medium_risk,
        high_risk = config.detection.high_risk,
        "Configuration loaded"
    );

    let artifact = persistence::load_artifact(&config.models.artifact_path)?;
    let reference = persistence::load_reference(&config.models.reference_path)?;
    info!(
        model_version = %artifact.version(),
        base_models = ?artifact.model_names(),
        features = artifact.feature_schema().len(),
        "Ensemble artifact loaded"
    );

    let pipeline = Arc::new(ScoringPipeline::new(Arc::new(artifact), &config, reference)?);
    if let Some(path) = &config.pipeline.history_path {
        let history = persistence::read_transactions(path)?;
        pipeline.warm(history).context("Failed to replay history")?;
    }

    let metrics = Arc::new(PipelineMetrics::new());

    let client = async_nats::connect(&config.nats.url).await?;
    info!(url = %config.nats.url, "Connected to NATS");

    let consumer = TransactionConsumer::new(client.clone(), &config.nats.transaction_subject);
    let producer = Arc::new(DecisionProducer::new(client.clone(), &config.nats.decision_subject));
    info!(
        workers = config.pipeline.workers,
        listen = %consumer.subject(),
        publish = %producer.subject(),
        "Starting transaction processing loop"
    );

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(config.pipeline.workers));
    let timeout = Duration::from_millis(config.pipeline.timeout_ms);

    let reporter = MetricsReporter::new(metrics.clone(), 30);
    tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let pipeline = pipeline.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            let transaction = match decode_transaction(&message.payload) {
                Ok(tx) => tx,
                Err(e) => {
                    metrics.record_failure("decode");
                    warn!(error = %e, "Failed to decode transaction");
                    return;
                }
            };
            let tx_id = transaction.transaction_id.clone();

            // The blocking call commits window state as its last step, so an
            // elapsed timeout only drops the response.
            let scoring = tokio::task::spawn_blocking({
                let pipeline = pipeline.clone();
                move || pipeline.score(&transaction)
            });
            let decision = match tokio::time::timeout(timeout, scoring).await {
                Ok(Ok(Ok(decision))) => decision,
                Ok(Ok(Err(e))) => {
                    metrics.record_failure(e.kind());
                    log_scoring_error(&tx_id, &e);
                    return;
                }
                Ok(Err(e)) => {
                    metrics.record_failure("panic");
                    error!(transaction_id = %tx_id, error = %e, "Scoring task failed");
                    return;
                }
                Err(_) => {
                    metrics.record_failure("timeout");
                    warn!(transaction_id = %tx_id, timeout_ms = timeout.as_millis() as u64, "Scoring timed out");
                    return;
                }
            };

            let elapsed = start_time.elapsed();
            metrics.record_decision(decision.decision, decision.probability, elapsed);
            let response = decision.into_response(elapsed.as_secs_f64() * 1000.0, pipeline.model_version());

            if let Err(e) = producer.publish(&response).await {
                error!(transaction_id = %tx_id, error = %e, "Failed to publish decision");
            }
            if let Some(reply) = message.reply.clone() {
                if let Err(e) = producer.reply(reply, &response).await {
                    error!(transaction_id = %tx_id, error = %e, "Failed to send reply");
                }
            }

            drop(permit);
        });
    }

    info!("Scoring engine shutting down");
    metrics.log_summary();

    Ok(())
}

fn log_scoring_error(tx_id: &str, e: &PipelineError) {
    match e {
        PipelineError::StaleEntityQuery { .. } => {
            error!(transaction_id = %tx_id, error = %e, "Out-of-order delivery for entity")
        }
        PipelineError::InvalidTransaction { .. } => {
            warn!(transaction_id = %tx_id, error = %e, "Rejected transaction")
        }
        _ => error!(transaction_id = %tx_id, error = %e, "Scoring failed"),
    }
}
