//! Live scoring pipeline.
//!
//! Window state lives in two arrays of lock shards, one for customers and one
//! for terminals, always locked customer first. A request snapshots both
//! entities under the locks together with their observation counts, releases
//! the locks for feature building and inference, then relocks and appends only
//! if neither entity moved in between. A moved entity means the features are
//! out of date: the request is recomputed, and after a few lost races it holds
//! both locks for the whole computation instead.
//!
//! The append is the last step, so any error leaves both stores untouched.

use crate::config::AppConfig;
use crate::error::Result;
use crate::features::shard_for;
use crate::features::temporal::{commit_pair, customer_side, terminal_side};
use crate::features::{
    CalendarFeatures, EntityWindowStore, FeatureVector, ReferenceDistribution, TemporalFeatures,
    TransactionFeatureBuilder,
};
use crate::models::EnsembleArtifact;
use crate::types::{sort_chronologically, Decision, DecisionThresholds, RiskFactor, ScoringDecision, Transaction};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Lock-free inference rounds before a request holds its locks throughout
const OPTIMISTIC_ATTEMPTS: usize = 3;

pub struct ScoringPipeline {
    artifact: Arc<EnsembleArtifact>,
    builder: TransactionFeatureBuilder,
    reference: ReferenceDistribution,
    thresholds: DecisionThresholds,
    risk_factor_count: usize,
    customers: Vec<Mutex<EntityWindowStore>>,
    terminals: Vec<Mutex<EntityWindowStore>>,
}

impl ScoringPipeline {
    /// Fails with `SchemaMismatch` if the configured windows do not produce
    /// the schema the artifact was trained on.
    pub fn new(
        artifact: Arc<EnsembleArtifact>,
        config: &AppConfig,
        reference: ReferenceDistribution,
    ) -> Result<Self> {
        config.validate()?;
        let builder = TransactionFeatureBuilder::new(&config.features)?;
        builder.ensure_schema(artifact.feature_schema())?;

        let pipeline = Self::assemble(
            artifact,
            builder,
            reference,
            config.detection.thresholds()?,
            config.detection.risk_factor_count,
            config.pipeline.shards,
        )?;
        info!(
            model_version = %pipeline.artifact.version(),
            shards = config.pipeline.shards,
            reference_size = pipeline.reference.len(),
            "Scoring pipeline ready"
        );
        Ok(pipeline)
    }

    fn assemble(
        artifact: Arc<EnsembleArtifact>,
        builder: TransactionFeatureBuilder,
        reference: ReferenceDistribution,
        thresholds: DecisionThresholds,
        risk_factor_count: usize,
        shards: usize,
    ) -> Result<Self> {
        let shards = shards.max(1);
        let stores = |n: usize| -> Result<Vec<Mutex<EntityWindowStore>>> {
            (0..n)
                .map(|_| EntityWindowStore::new(builder.windows()).map(Mutex::new))
                .collect()
        };
        let customers = stores(shards)?;
        let terminals = stores(shards)?;

        Ok(Self {
            artifact,
            builder,
            reference,
            thresholds,
            risk_factor_count,
            customers,
            terminals,
        })
    }

    pub fn artifact(&self) -> &Arc<EnsembleArtifact> {
        &self.artifact
    }

    pub fn model_version(&self) -> &str {
        self.artifact.version()
    }

    pub fn thresholds(&self) -> &DecisionThresholds {
        &self.thresholds
    }

    /// Number of (customers, terminals) with live state
    pub fn entity_counts(&self) -> (usize, usize) {
        let count = |shards: &[Mutex<EntityWindowStore>]| -> usize {
            shards.iter().map(|s| s.lock().entity_count()).sum()
        };
        (count(&self.customers), count(&self.terminals))
    }

    /// Score one transaction against the current window state, then record it.
    pub fn score(&self, tx: &Transaction) -> Result<ScoringDecision> {
        tx.validate()?;
        let customer_shard = &self.customers[shard_for(&tx.customer_id, self.customers.len())];
        let terminal_shard = &self.terminals[shard_for(&tx.terminal_id, self.terminals.len())];

        for attempt in 1..=OPTIMISTIC_ATTEMPTS {
            let (temporal, seen) = {
                let customers = customer_shard.lock();
                let terminals = terminal_shard.lock();
                (
                    snapshot(&customers, &terminals, tx)?,
                    observations(&customers, &terminals, tx),
                )
            };
            let decision = self.decide(tx, &temporal)?;

            let mut customers = customer_shard.lock();
            let mut terminals = terminal_shard.lock();
            if observations(&customers, &terminals, tx) == seen {
                commit_pair(&mut customers, &mut terminals, tx)?;
                drop(terminals);
                drop(customers);
                return Ok(self.report(tx, decision));
            }
            debug!(
                transaction_id = %tx.transaction_id,
                attempt = attempt,
                "Entity state moved while scoring, recomputing"
            );
        }

        let mut customers = customer_shard.lock();
        let mut terminals = terminal_shard.lock();
        let temporal = snapshot(&customers, &terminals, tx)?;
        let decision = self.decide(tx, &temporal)?;
        commit_pair(&mut customers, &mut terminals, tx)?;
        drop(terminals);
        drop(customers);
        Ok(self.report(tx, decision))
    }

    fn decide(&self, tx: &Transaction, temporal: &TemporalFeatures) -> Result<ScoringDecision> {
        let features = self
            .builder
            .build(tx, temporal, self.reference.percentile(tx.amount))?;
        self.score_vector(&tx.transaction_id, &features)
    }

    fn report(&self, tx: &Transaction, decision: ScoringDecision) -> ScoringDecision {
        debug!(
            transaction_id = %tx.transaction_id,
            probability = decision.probability,
            decision = decision.decision.as_str(),
            "Transaction scored"
        );
        if decision.decision != Decision::Approve {
            info!(
                transaction_id = %tx.transaction_id,
                customer_id = %tx.customer_id,
                terminal_id = %tx.terminal_id,
                amount = tx.amount,
                probability = decision.probability,
                decision = decision.decision.as_str(),
                "Risky transaction"
            );
        }
        decision
    }

    /// Score an already-built feature vector. Does not touch window state.
    pub fn score_vector(&self, transaction_id: &str, features: &FeatureVector) -> Result<ScoringDecision> {
        let prediction = self.artifact.predict(features)?;
        Ok(ScoringDecision {
            transaction_id: transaction_id.to_string(),
            probability: prediction.probability,
            decision: Decision::from_probability(prediction.probability, &self.thresholds),
            risk_factors: self.explain(features),
        })
    }

    /// Replay past transactions into the window stores without scoring them.
    /// Returns the number replayed.
    pub fn warm(&self, mut history: Vec<Transaction>) -> Result<usize> {
        sort_chronologically(&mut history);
        for tx in &history {
            tx.validate()?;
            let mut customers = self.customers[shard_for(&tx.customer_id, self.customers.len())].lock();
            let mut terminals = self.terminals[shard_for(&tx.terminal_id, self.terminals.len())].lock();
            commit_pair(&mut customers, &mut terminals, tx)?;
        }
        info!(transactions = history.len(), "Window state warmed from history");
        Ok(history.len())
    }

    /// Features furthest from the training mean, in standard deviations.
    pub fn explain(&self, features: &FeatureVector) -> Vec<RiskFactor> {
        let scaler = self.artifact.scaler();
        let mut factors: Vec<RiskFactor> = features
            .iter()
            .zip(scaler.mean().iter().zip(scaler.scale()))
            .map(|((name, value), (mean, scale))| RiskFactor {
                feature: name.to_string(),
                contribution: (value - mean) / scale,
            })
            .filter(|f| f.contribution.is_finite() && f.contribution.abs() > 1e-12)
            .collect();

        factors.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        factors.truncate(self.risk_factor_count);
        factors
    }
}

fn snapshot(
    customers: &EntityWindowStore,
    terminals: &EntityWindowStore,
    tx: &Transaction,
) -> Result<TemporalFeatures> {
    Ok(TemporalFeatures {
        calendar: CalendarFeatures::from_timestamp(tx.timestamp),
        customer: customer_side(customers, tx)?,
        terminal: terminal_side(terminals, tx)?,
    })
}

fn observations(customers: &EntityWindowStore, terminals: &EntityWindowStore, tx: &Transaction) -> (u64, u64) {
    (
        customers.observations(&tx.customer_id),
        terminals.observations(&tx.terminal_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::error::PipelineError;
    use crate::models::{BaseModelConfig, BoostingParams, ForestParams, LearnerSpec, LogisticParams};
    use crate::simulation::{SimulationConfig, SyntheticGenerator};
    use crate::features::TemporalFeatureEngine;
    use crate::training::train_from_transactions;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Barrier;
    use std::thread;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.workers = 2;
        config.pipeline.shards = 4;
        config.models.base_models = vec![
            BaseModelConfig {
                name: "logistic_regression".to_string(),
                learner: LearnerSpec::LogisticRegression(LogisticParams {
                    epochs: 100,
                    balanced: true,
                    ..LogisticParams::default()
                }),
            },
            BaseModelConfig {
                name: "random_forest".to_string(),
                learner: LearnerSpec::RandomForest(ForestParams {
                    n_trees: 5,
                    max_depth: 5,
                    ..ForestParams::default()
                }),
            },
            BaseModelConfig {
                name: "gradient_boosting".to_string(),
                learner: LearnerSpec::GradientBoosting(BoostingParams {
                    n_estimators: 10,
                    ..BoostingParams::default()
                }),
            },
        ];
        config
    }

    fn pipeline() -> ScoringPipeline {
        let config = test_config();
        let transactions = SyntheticGenerator::new(SimulationConfig {
            n_customers: 50,
            n_terminals: 100,
            n_days: 20,
            compromised_terminals_per_day: 2,
            ..SimulationConfig::default()
        })
        .generate();
        let outcome = train_from_transactions(transactions, &config).unwrap();
        ScoringPipeline::new(Arc::new(outcome.artifact), &config, outcome.reference).unwrap()
    }

    fn live_tx(id: &str, customer: &str, terminal: &str, amount: f64, hours: i64) -> Transaction {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        Transaction::new(id, customer, terminal, amount, t0 + Duration::hours(hours))
    }

    #[test]
    fn test_score_records_state_after_decision() {
        let pipeline = pipeline();
        assert_eq!(pipeline.entity_counts(), (0, 0));

        let first = pipeline.score(&live_tx("L1", "C9", "T9", 40.0, 0)).unwrap();
        assert!((0.0..=1.0).contains(&first.probability));
        assert!(first.risk_factors.len() <= 5);
        assert_eq!(pipeline.entity_counts(), (1, 1));

        pipeline.score(&live_tx("L2", "C9", "T9", 45.0, 1)).unwrap();
        assert_eq!(pipeline.entity_counts(), (1, 1));
    }

    #[test]
    fn test_stale_request_leaves_state_unchanged() {
        let pipeline = pipeline();
        pipeline.score(&live_tx("L1", "C1", "T1", 40.0, 5)).unwrap();

        // new customer, but its terminal has already seen a later transaction
        let err = pipeline.score(&live_tx("L2", "C2", "T1", 40.0, 1)).unwrap_err();
        assert!(matches!(err, PipelineError::StaleEntityQuery { .. }));
        assert_eq!(pipeline.entity_counts(), (1, 1));
    }

    #[test]
    fn test_schema_mismatch_leaves_state_unchanged() {
        let base = pipeline();
        let narrow = TransactionFeatureBuilder::new(&FeatureConfig {
            temporal_windows: vec![1, 28],
            deviation_window_days: 28,
        })
        .unwrap();
        let pipeline = ScoringPipeline::assemble(
            Arc::clone(&base.artifact),
            narrow,
            base.reference.clone(),
            base.thresholds,
            5,
            2,
        )
        .unwrap();

        let err = pipeline.score(&live_tx("L1", "C1", "T1", 40.0, 0)).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
        assert_eq!(pipeline.entity_counts(), (0, 0));
    }

    #[test]
    fn test_new_rejects_windows_that_change_the_schema() {
        let base = pipeline();
        let mut config = test_config();
        config.features.temporal_windows = vec![1, 28];
        let result = ScoringPipeline::new(Arc::clone(&base.artifact), &config, ReferenceDistribution::default());
        assert!(matches!(result, Err(PipelineError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_warm_feeds_window_features() {
        let pipeline = pipeline();
        let history = vec![
            live_tx("H2", "C1", "T1", 100.0, 1),
            live_tx("H1", "C1", "T2", 100.0, 0),
        ];
        assert_eq!(pipeline.warm(history).unwrap(), 2);
        assert_eq!(pipeline.entity_counts(), (1, 2));

        // warmed history is visible to the next request
        let customers = pipeline.customers[shard_for("C1", pipeline.customers.len())].lock();
        let tx = live_tx("L1", "C1", "T1", 500.0, 2);
        let side = customer_side(&customers, &tx).unwrap();
        assert_eq!(side.windows[0].count, 2);
        assert_eq!(side.windows[0].mean, 100.0);
        assert!(!side.is_new_terminal);
        assert_eq!(side.unique_terminals, 2);
    }

    #[test]
    fn test_explain_orders_by_absolute_deviation() {
        let pipeline = pipeline();
        let schema = Arc::clone(pipeline.artifact.feature_schema());
        let scaler = pipeline.artifact.scaler();
        let mut values = scaler.mean().to_vec();
        let amount = schema.index_of("amount").unwrap();
        let hour = schema.index_of("hour").unwrap();
        values[amount] += 10.0 * scaler.scale()[amount];
        values[hour] -= 2.0 * scaler.scale()[hour];
        let vector = FeatureVector::new(schema, values).unwrap();

        let factors = pipeline.explain(&vector);
        assert_eq!(factors.len(), 2);
        assert_eq!(factors[0].feature, "amount");
        assert!((factors[0].contribution - 10.0).abs() < 1e-9);
        assert_eq!(factors[1].feature, "hour");
        assert!(factors[1].contribution < 0.0);
    }

    const SHARED_CUSTOMERS: [&str; 3] = ["C1", "C2", "C3"];
    const SHARED_TERMINALS: [&str; 2] = ["T1", "T2"];

    /// Three transactions per worker per round, all at the round's instant,
    /// spread over the shared customers and terminals.
    fn round_batch(worker: usize, round: usize) -> Vec<Transaction> {
        (0..3)
            .map(|k| {
                let n = worker * 3 + k;
                live_tx(
                    &format!("W{worker}R{round}K{k}"),
                    SHARED_CUSTOMERS[(n + round) % SHARED_CUSTOMERS.len()],
                    SHARED_TERMINALS[(n + worker) % SHARED_TERMINALS.len()],
                    (10 + n * 7 + round * 3) as f64,
                    round as i64,
                )
            })
            .collect()
    }

    #[test]
    fn test_concurrent_scoring_matches_sequential_replay() {
        let pipeline = pipeline();
        let workers = 4;
        let rounds = 6;
        let barrier = Barrier::new(workers);

        let results: Vec<Result<ScoringDecision>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let pipeline = &pipeline;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let mut out = Vec::new();
                        for round in 0..rounds {
                            for tx in round_batch(worker, round) {
                                out.push(pipeline.score(&tx));
                            }
                            // no worker starts a later instant until this one is done
                            barrier.wait();
                        }
                        out
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(results.len(), workers * rounds * 3);
        for result in &results {
            let decision = result.as_ref().unwrap();
            assert!((0.0..=1.0).contains(&decision.probability));
        }
        assert_eq!(pipeline.entity_counts(), (3, 2));

        let mut engine = TemporalFeatureEngine::new(pipeline.builder.windows()).unwrap();
        for round in 0..rounds {
            for worker in 0..workers {
                for tx in round_batch(worker, round) {
                    engine.commit(&tx).unwrap();
                }
            }
        }

        let as_of = live_tx("end", "C1", "T1", 1.0, rounds as i64).timestamp;
        let same = |live: &EntityWindowStore, replay: &EntityWindowStore, key: &str| {
            assert_eq!(live.observations(key), replay.observations(key), "{key}");
            assert_eq!(live.last_observed(key), replay.last_observed(key), "{key}");
            assert_eq!(live.counterpart_count(key), replay.counterpart_count(key), "{key}");
            let a = live.query_all(key, as_of).unwrap();
            let b = replay.query_all(key, as_of).unwrap();
            for (x, y) in a.iter().zip(&b) {
                assert_eq!(x.count, y.count, "{key}");
                assert!((x.mean - y.mean).abs() < 1e-9, "{key}");
                assert!((x.std - y.std).abs() < 1e-9, "{key}");
                assert_eq!(x.max, y.max, "{key}");
            }
        };
        for key in SHARED_CUSTOMERS {
            let live = pipeline.customers[shard_for(key, pipeline.customers.len())].lock();
            same(&*live, engine.customers(), key);
        }
        for key in SHARED_TERMINALS {
            let live = pipeline.terminals[shard_for(key, pipeline.terminals.len())].lock();
            same(&*live, engine.terminals(), key);
        }
    }
}
