//! Test Transaction Producer
//!
//! Generates a synthetic transaction stream and publishes it, in time order,
//! to NATS for pipeline testing. Labels are stripped before publishing.
//!
//! Usage: test_producer [nats_url] [subject] [days] [customers] [delay_ms] [seed]

use chrono::{Duration as ChronoDuration, Utc};
use fraud_scoring_engine::simulation::{SimulationConfig, SyntheticGenerator};
use fraud_scoring_engine::Transaction;
use std::time::Duration;
use tracing::{info, warn};

fn stream(days: u32, customers: usize, seed: u64) -> Vec<Transaction> {
    let config = SimulationConfig {
        n_customers: customers,
        n_terminals: customers * 2,
        n_days: days,
        start: Utc::now() - ChronoDuration::days(i64::from(days)),
        seed,
        ..SimulationConfig::default()
    };
    SyntheticGenerator::new(config).generate()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?)
                .add_directive("fraud_scoring_engine=info".parse()?),
        )
        .init();

    info!("Starting Test Transaction Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("transactions");
    let days: u32 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(3);
    let customers: usize = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(100);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(10);
    let seed: u64 = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(7);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        days = days,
        customers = customers,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let transactions = stream(days, customers, seed);

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(&transactions);
        }
    };

    let total = transactions.len();
    let mut frauds = 0;
    for (i, mut tx) in transactions.into_iter().enumerate() {
        if tx.label.take() == Some(true) {
            frauds += 1;
        }
        let payload = serde_json::to_vec(&tx)?;
        client.publish(subject.to_string(), payload.into()).await?;

        if (i + 1) % 100 == 0 {
            info!(published = i + 1, total = total, frauds = frauds, "Publishing");
        }
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    client.flush().await?;

    info!(published = total, frauds = frauds, "Completed");
    Ok(())
}

fn run_dry_mode(transactions: &[Transaction]) -> anyhow::Result<()> {
    info!(transactions = transactions.len(), "Running in dry-run mode (no NATS connection)");
    for (i, tx) in transactions.iter().enumerate().filter(|(i, _)| i % 100 == 0) {
        let json = serde_json::to_string_pretty(tx)?;
        info!("Sample transaction {}:\n{}", i + 1, json);
    }
    Ok(())
}
