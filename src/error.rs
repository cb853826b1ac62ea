//! Error types for the scoring core.
//!
//! Every variant is fatal for the call that produced it. Recoverable
//! conditions (empty windows, zero denominators) are resolved with defaults
//! where they occur and never surface here.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Which temporal partition a training check refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Validation,
    Test,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Partition::Train => "train",
            Partition::Validation => "validation",
            Partition::Test => "test",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("feature schema mismatch: expected {expected:?}, got {actual:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error(
        "{partition} partition has {positives} fraud / {negatives} legitimate rows, \
         at least {required} of each class required"
    )]
    InsufficientPartitionData {
        partition: Partition,
        positives: usize,
        negatives: usize,
        required: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("stale query for entity {entity}: as_of {as_of} precedes last observation {last_observed}")]
    StaleEntityQuery {
        entity: String,
        as_of: DateTime<Utc>,
        last_observed: DateTime<Utc>,
    },

    #[error("invalid transaction {transaction_id}: {reason}")]
    InvalidTransaction {
        transaction_id: String,
        reason: String,
    },

    #[error("transaction {0} has no label and cannot be used for training")]
    UnlabeledTransaction(String),

    #[error("invalid ensemble artifact: {0}")]
    InvalidArtifact(String),

    #[error("dataset is empty")]
    EmptyDataset,
}

impl PipelineError {
    pub fn schema_mismatch<A, B>(expected: &[A], actual: &[B]) -> Self
    where
        A: AsRef<str>,
        B: AsRef<str>,
    {
        Self::SchemaMismatch {
            expected: expected.iter().map(|s| s.as_ref().to_string()).collect(),
            actual: actual.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Short label for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::InsufficientPartitionData { .. } => "insufficient_partition_data",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::StaleEntityQuery { .. } => "stale_entity_query",
            Self::InvalidTransaction { .. } => "invalid_transaction",
            Self::UnlabeledTransaction(_) => "unlabeled_transaction",
            Self::InvalidArtifact(_) => "invalid_artifact",
            Self::EmptyDataset => "empty_dataset",
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = PipelineError::InsufficientPartitionData {
            partition: Partition::Validation,
            positives: 0,
            negatives: 150,
            required: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("validation"));
        assert!(msg.contains("150"));

        let err = PipelineError::schema_mismatch(&["a", "b"], &["b", "a"]);
        assert!(err.to_string().contains("expected [\"a\", \"b\"]"));
    }
}
