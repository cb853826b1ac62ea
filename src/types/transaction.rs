//! Transaction records entering the scoring core

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single payment at a terminal, as delivered by the ingestion layer.
///
/// Records are immutable once ingested. The ingestion layer has already
/// parsed timestamps and removed duplicate `transaction_id`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    #[serde(alias = "TRANSACTION_ID")]
    pub transaction_id: String,

    /// Paying customer
    #[serde(alias = "CUSTOMER_ID")]
    pub customer_id: String,

    /// Terminal (merchant device) receiving the payment
    #[serde(alias = "TERMINAL_ID")]
    pub terminal_id: String,

    /// Amount, non-negative
    #[serde(alias = "TX_AMOUNT")]
    pub amount: f64,

    /// Instant of the payment
    #[serde(alias = "TX_DATETIME")]
    pub timestamp: DateTime<Utc>,

    /// Fraud label; present for training and evaluation, absent when live
    #[serde(default, alias = "TX_FRAUD", deserialize_with = "deserialize_label")]
    pub label: Option<bool>,
}

impl Transaction {
    /// Create an unlabelled transaction
    pub fn new(
        transaction_id: impl Into<String>,
        customer_id: impl Into<String>,
        terminal_id: impl Into<String>,
        amount: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            customer_id: customer_id.into(),
            terminal_id: terminal_id.into(),
            amount,
            timestamp,
            label: None,
        }
    }

    /// Attach a fraud label
    pub fn with_label(mut self, is_fraud: bool) -> Self {
        self.label = Some(is_fraud);
        self
    }

    /// Check the ingestion contract: ids present, amount finite and non-negative.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.transaction_id.is_empty() {
            Some("empty transaction_id")
        } else if self.customer_id.is_empty() {
            Some("empty customer_id")
        } else if self.terminal_id.is_empty() {
            Some("empty terminal_id")
        } else if !self.amount.is_finite() || self.amount < 0.0 {
            Some("amount must be a finite, non-negative number")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(PipelineError::InvalidTransaction {
                transaction_id: self.transaction_id.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Labels arrive either as booleans or as 0/1 integers.
fn deserialize_label<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawLabel {
        Bool(bool),
        Int(i64),
    }

    match Option::<RawLabel>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawLabel::Bool(b)) => Ok(Some(b)),
        Some(RawLabel::Int(0)) => Ok(Some(false)),
        Some(RawLabel::Int(1)) => Ok(Some(true)),
        Some(RawLabel::Int(other)) => Err(serde::de::Error::custom(format!(
            "label must be 0 or 1, got {other}"
        ))),
    }
}

/// Sort transactions by timestamp, keeping ingestion order among ties.
pub fn sort_chronologically(transactions: &mut [Transaction]) {
    // stable sort preserves ingestion order for equal timestamps
    transactions.sort_by_key(|tx| tx.timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_transaction_serialization() {
        let tx = Transaction::new("tx_123", "c1", "t1", 42.5, at(10)).with_label(true);

        let json = serde_json::to_string(&tx).unwrap();
        let deserialized: Transaction = serde_json::from_str(&json).unwrap();

        assert_eq!(tx, deserialized);
    }

    #[test]
    fn test_upper_case_columns_and_integer_label() {
        let json = r#"{
            "TRANSACTION_ID": "7",
            "CUSTOMER_ID": "596",
            "TERMINAL_ID": "3156",
            "TX_AMOUNT": 57.16,
            "TX_DATETIME": "2018-04-01T00:00:31Z",
            "TX_FRAUD": 1
        }"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.customer_id, "596");
        assert_eq!(tx.label, Some(true));
    }

    #[test]
    fn test_missing_label_is_live() {
        let json = r#"{"transaction_id":"a","customer_id":"c","terminal_id":"t",
                       "amount":1.0,"timestamp":"2024-01-01T00:00:00Z"}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.label, None);
    }

    #[test]
    fn test_validate_rejects_negative_amount() {
        let tx = Transaction::new("tx_1", "c1", "t1", -3.0, at(1));
        assert!(matches!(
            tx.validate(),
            Err(PipelineError::InvalidTransaction { .. })
        ));

        let tx = Transaction::new("tx_2", "", "t1", 3.0, at(1));
        assert!(tx.validate().is_err());

        let tx = Transaction::new("tx_3", "c1", "t1", f64::NAN, at(1));
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_sort_keeps_ingestion_order_for_ties() {
        let mut txs = vec![
            Transaction::new("late", "c", "t", 1.0, at(5)),
            Transaction::new("tie_a", "c", "t", 1.0, at(2)),
            Transaction::new("tie_b", "c", "t", 1.0, at(2)),
        ];
        sort_chronologically(&mut txs);
        let ids: Vec<&str> = txs.iter().map(|t| t.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["tie_a", "tie_b", "late"]);
    }
}
