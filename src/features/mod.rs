//! Causal feature engineering: window store, temporal engine, feature builder

pub mod builder;
pub mod percentile;
pub mod schema;
pub mod temporal;
pub mod window;

pub use builder::{feature_names, TransactionFeatureBuilder};
pub use percentile::{ReferenceDistribution, RunningRank};
pub use schema::{FeatureSchema, FeatureVector, FEATURE_SCHEMA_VERSION};
pub use temporal::{CalendarFeatures, TemporalFeatureEngine, TemporalFeatures};
pub use window::{EntityWindowStore, WindowStats};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic shard index for an entity key.
pub(crate) fn shard_for(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}
