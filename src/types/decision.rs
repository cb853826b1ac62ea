//! Scoring decision data structures

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Action taken on a scored transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Approve,
    Review,
    Block,
}

impl Decision {
    /// Map a probability onto an action using the configured cut-offs
    pub fn from_probability(probability: f64, thresholds: &DecisionThresholds) -> Self {
        if probability >= thresholds.high_risk {
            Decision::Block
        } else if probability >= thresholds.medium_risk {
            Decision::Review
        } else {
            Decision::Approve
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Review => "review",
            Decision::Block => "block",
        }
    }
}

/// Probability cut-offs; `0 <= medium_risk < high_risk <= 1`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    pub high_risk: f64,
    pub medium_risk: f64,
}

impl DecisionThresholds {
    pub fn new(medium_risk: f64, high_risk: f64) -> Result<Self> {
        let thresholds = Self {
            high_risk,
            medium_risk,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 <= self.medium_risk
            && self.medium_risk < self.high_risk
            && self.high_risk <= 1.0;
        if ordered {
            Ok(())
        } else {
            Err(PipelineError::invalid_config(format!(
                "thresholds must satisfy 0 <= medium_risk < high_risk <= 1 (medium_risk={}, high_risk={})",
                self.medium_risk, self.high_risk
            )))
        }
    }
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            high_risk: 0.8,
            medium_risk: 0.3,
        }
    }
}

/// A feature that pushed the score, with its standardized deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub feature: String,
    pub contribution: f64,
}

/// Outcome of scoring one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringDecision {
    pub transaction_id: String,
    /// Final meta-model probability in [0, 1]
    pub probability: f64,
    pub decision: Decision,
    /// Ordered by descending absolute contribution
    pub risk_factors: Vec<RiskFactor>,
}

impl ScoringDecision {
    /// Probability expressed on a 0-100 scale, two decimals
    pub fn risk_score(&self) -> f64 {
        (self.probability * 10_000.0).round() / 100.0
    }

    /// Wrap for the serving shell, which adds timing and model version
    pub fn into_response(self, processing_time_ms: f64, model_version: &str) -> ScoringResponse {
        let risk_score = self.risk_score();
        ScoringResponse {
            transaction_id: self.transaction_id,
            fraud_probability: self.probability,
            risk_score,
            decision: self.decision,
            risk_factors: self.risk_factors,
            processing_time_ms,
            model_version: model_version.to_string(),
        }
    }
}

/// Response published by the serving shell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringResponse {
    pub transaction_id: String,
    pub fraud_probability: f64,
    pub risk_score: f64,
    pub decision: Decision,
    pub risk_factors: Vec<RiskFactor>,
    pub processing_time_ms: f64,
    pub model_version: String,
}
