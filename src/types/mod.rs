//! Type definitions shared across the scoring core

pub mod decision;
pub mod transaction;

pub use decision::{Decision, DecisionThresholds, RiskFactor, ScoringDecision, ScoringResponse};
pub use transaction::{sort_chronologically, Transaction};
