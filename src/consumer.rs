//! NATS message consumer for incoming transactions

use crate::types::Transaction;
use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use tracing::info;

/// Consumer for receiving transactions from NATS
pub struct TransactionConsumer {
    client: Client,
    subject: String,
}

impl TransactionConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the transaction subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to transaction subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Parse and validate one message payload.
pub fn decode_transaction(payload: &[u8]) -> Result<Transaction> {
    let tx: Transaction = serde_json::from_slice(payload).context("Failed to parse transaction")?;
    tx.validate()?;
    Ok(tx)
}
