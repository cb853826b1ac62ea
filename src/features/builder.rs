//! Transaction feature builder.
//!
//! Turns a transaction and its temporal features into the fixed-width vector
//! the ensemble consumes. The column order is decided once, when the builder
//! is constructed, and every vector is checked against it.

use super::schema::{FeatureSchema, FeatureVector};
use super::temporal::TemporalFeatures;
use super::window::WindowStats;
use crate::config::FeatureConfig;
use crate::error::{PipelineError, Result};
use crate::types::Transaction;
use std::sync::Arc;

/// Additive guard for ratio denominators
pub const RATIO_EPSILON: f64 = 1e-6;

const WINDOW_STATS: [&str; 4] = ["tx_count", "avg_amount", "std_amount", "max_amount"];

/// Column names, in vector order, for the given windows
pub fn feature_names(windows_days: &[u32]) -> Vec<String> {
    let mut names: Vec<String> = [
        "hour",
        "day_of_week",
        "is_weekend",
        "amount",
        "log_amount",
        "amount_rounded_10",
        "amount_rounded_100",
        "amount_is_round",
        "amount_percentile",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for entity in ["customer", "terminal"] {
        for days in windows_days {
            for stat in WINDOW_STATS {
                names.push(format!("{entity}_{stat}_{days}d"));
            }
        }
    }

    names.extend(
        [
            "amount_deviation_customer",
            "amount_deviation_terminal",
            "time_since_last_tx",
            "tx_velocity",
            "customer_unique_terminals",
            "terminal_unique_customers",
            "is_new_customer_terminal",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    names
}

#[derive(Debug, Clone)]
pub struct TransactionFeatureBuilder {
    windows_days: Vec<u32>,
    deviation_index: usize,
    schema: Arc<FeatureSchema>,
}

impl TransactionFeatureBuilder {
    pub fn new(config: &FeatureConfig) -> Result<Self> {
        config.validate()?;
        let deviation_index = config
            .temporal_windows
            .iter()
            .position(|&d| d == config.deviation_window_days)
            .ok_or_else(|| {
                PipelineError::invalid_config(format!(
                    "deviation window {} is not one of the temporal windows",
                    config.deviation_window_days
                ))
            })?;

        Ok(Self {
            windows_days: config.temporal_windows.clone(),
            deviation_index,
            schema: Arc::new(FeatureSchema::new(feature_names(&config.temporal_windows))),
        })
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn windows(&self) -> &[u32] {
        &self.windows_days
    }

    /// Fail unless this builder produces exactly `expected`.
    pub fn ensure_schema(&self, expected: &FeatureSchema) -> Result<()> {
        expected.ensure_matches(&self.schema)
    }

    /// Build the feature vector. Non-finite values become 0.
    pub fn build(
        &self,
        tx: &Transaction,
        temporal: &TemporalFeatures,
        amount_percentile: f64,
    ) -> Result<FeatureVector> {
        let expected = self.windows_days.len();
        if temporal.customer.windows.len() != expected || temporal.terminal.windows.len() != expected {
            return Err(PipelineError::invalid_config(format!(
                "temporal features carry {}/{} windows, builder expects {expected}",
                temporal.customer.windows.len(),
                temporal.terminal.windows.len()
            )));
        }

        let amount = tx.amount;
        let calendar = &temporal.calendar;
        let mut values = Vec::with_capacity(self.schema.len());

        values.push(f64::from(calendar.hour));
        values.push(f64::from(calendar.day_of_week));
        values.push(flag(calendar.is_weekend));

        values.push(amount);
        values.push(amount.ln_1p());
        values.push((amount / 10.0).floor() * 10.0);
        values.push((amount / 100.0).floor() * 100.0);
        values.push(flag(amount % 10.0 == 0.0));
        values.push(amount_percentile);

        push_windows(&mut values, &temporal.customer.windows);
        push_windows(&mut values, &temporal.terminal.windows);

        let customer_mean = temporal.customer.windows[self.deviation_index].mean;
        let terminal_mean = temporal.terminal.windows[self.deviation_index].mean;
        values.push(amount / (customer_mean + RATIO_EPSILON));
        values.push(amount / (terminal_mean + RATIO_EPSILON));

        let hours_since_last = temporal
            .customer
            .previous_tx
            .map(|prev| (tx.timestamp - prev).num_milliseconds() as f64 / 3_600_000.0)
            .unwrap_or(0.0);
        values.push(hours_since_last);
        values.push(amount / (hours_since_last + RATIO_EPSILON));

        values.push(temporal.customer.unique_terminals as f64);
        values.push(temporal.terminal.unique_customers as f64);
        values.push(flag(temporal.customer.is_new_terminal));

        for v in values.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }

        FeatureVector::new(Arc::clone(&self.schema), values)
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn push_windows(values: &mut Vec<f64>, windows: &[WindowStats]) {
    for w in windows {
        values.push(w.count as f64);
        values.push(w.mean);
        values.push(w.std);
        values.push(w.max);
    }
}
