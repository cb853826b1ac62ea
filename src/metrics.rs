//! Runtime statistics for the scoring service

use crate::types::Decision;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const LATENCY_WINDOW: usize = 10_000;

/// Counters and distributions shared across request tasks
pub struct PipelineMetrics {
    /// Transactions scored successfully
    pub transactions_scored: AtomicU64,
    /// Requests rejected (bad payload, stale entity, schema mismatch, timeout)
    pub transactions_failed: AtomicU64,
    decisions: RwLock<HashMap<Decision, u64>>,
    /// Recent end-to-end latencies in microseconds
    latencies: Mutex<Vec<u64>>,
    probability_buckets: Mutex<[u64; 10]>,
    failures_by_kind: RwLock<HashMap<String, u64>>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            transactions_scored: AtomicU64::new(0),
            transactions_failed: AtomicU64::new(0),
            decisions: RwLock::new(HashMap::new()),
            latencies: Mutex::new(Vec::with_capacity(1000)),
            probability_buckets: Mutex::new([0; 10]),
            failures_by_kind: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_decision(&self, decision: Decision, probability: f64, latency: Duration) {
        self.transactions_scored.fetch_add(1, Ordering::Relaxed);
        *self.decisions.write().entry(decision).or_insert(0) += 1;

        {
            let mut latencies = self.latencies.lock();
            latencies.push(latency.as_micros() as u64);
            if latencies.len() > LATENCY_WINDOW {
                latencies.drain(0..LATENCY_WINDOW / 2);
            }
        }

        let bucket = (probability.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        self.probability_buckets.lock()[bucket] += 1;
    }

    pub fn record_failure(&self, kind: &str) {
        self.transactions_failed.fetch_add(1, Ordering::Relaxed);
        *self.failures_by_kind.write().entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn decision_count(&self, decision: Decision) -> u64 {
        self.decisions.read().get(&decision).copied().unwrap_or(0)
    }

    pub fn failures_by_kind(&self) -> HashMap<String, u64> {
        self.failures_by_kind.read().clone()
    }

    pub fn latency_stats(&self) -> LatencyStats {
        let mut sorted = self.latencies.lock().clone();
        if sorted.is_empty() {
            return LatencyStats::default();
        }
        sorted.sort_unstable();

        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];
        LatencyStats {
            count: count as u64,
            mean_us: sorted.iter().sum::<u64>() / count as u64,
            p50_us: at(0.5),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Transactions per second since start
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn probability_distribution(&self) -> [u64; 10] {
        *self.probability_buckets.lock()
    }

    pub fn log_summary(&self) {
        let scored = self.transactions_scored.load(Ordering::Relaxed);
        let failed = self.transactions_failed.load(Ordering::Relaxed);
        let latency = self.latency_stats();

        info!(
            scored = scored,
            failed = failed,
            throughput = self.throughput(),
            approve = self.decision_count(Decision::Approve),
            review = self.decision_count(Decision::Review),
            block = self.decision_count(Decision::Block),
            "Scoring summary"
        );
        info!(
            mean_us = latency.mean_us,
            p50_us = latency.p50_us,
            p95_us = latency.p95_us,
            p99_us = latency.p99_us,
            max_us = latency.max_us,
            "Scoring latency"
        );

        let buckets = self.probability_distribution();
        let total: u64 = buckets.iter().sum();
        for (i, &count) in buckets.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let pct = count as f64 / total as f64 * 100.0;
            info!(
                bucket = %format!("{:.1}-{:.1}", i as f64 / 10.0, (i + 1) as f64 / 10.0),
                count = count,
                pct = pct,
                "Probability distribution"
            );
        }
        for (kind, count) in self.failures_by_kind() {
            info!(kind = %kind, count = count, "Scoring failures");
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Logs a metrics summary on a fixed interval
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        loop {
            interval.tick().await;
            self.metrics.log_summary();
        }
    }
}
