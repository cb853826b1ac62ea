//! Seeded generator of labelled synthetic transactions.
//!
//! Customers and terminals are placed on a 100x100 grid; a customer only uses
//! terminals within `radius` of home. Each customer has a spending profile
//! (mean amount, spread, transactions per day). Fraud is injected with three
//! scenarios:
//!
//! 1. any amount above `large_amount_threshold`,
//! 2. every transaction on a terminal compromised in the last
//!    `terminal_compromise_days` days,
//! 3. a third of a compromised customer's transactions over
//!    `customer_compromise_days` days, with the amount multiplied by 5.

use crate::types::{sort_chronologically, Transaction};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::info;

const GRID: f64 = 100.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub n_customers: usize,
    pub n_terminals: usize,
    pub n_days: u32,
    pub start: DateTime<Utc>,
    pub seed: u64,
    /// Customers reach terminals within this distance of home
    pub radius: f64,
    pub large_amount_threshold: f64,
    pub compromised_terminals_per_day: usize,
    pub terminal_compromise_days: u32,
    pub compromised_customers_per_day: usize,
    pub customer_compromise_days: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_customers: 100,
            n_terminals: 200,
            n_days: 30,
            start: Utc
                .with_ymd_and_hms(2024, 4, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            seed: 42,
            radius: 50.0,
            large_amount_threshold: 220.0,
            compromised_terminals_per_day: 1,
            terminal_compromise_days: 7,
            compromised_customers_per_day: 1,
            customer_compromise_days: 14,
        }
    }
}

#[derive(Debug, Clone)]
struct CustomerProfile {
    id: String,
    mean_amount: f64,
    std_amount: f64,
    tx_per_day: f64,
    terminals: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Terminal {
    id: String,
    x: f64,
    y: f64,
}

pub struct SyntheticGenerator {
    config: SimulationConfig,
    rng: StdRng,
}

impl SyntheticGenerator {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Chronologically sorted, labelled transactions with sequential ids.
    pub fn generate(&mut self) -> Vec<Transaction> {
        let terminals = self.terminals();
        let customers = self.customers(&terminals);

        let mut transactions = Vec::new();
        for customer in &customers {
            self.customer_transactions(customer, &terminals, &mut transactions);
        }
        sort_chronologically(&mut transactions);
        for (i, tx) in transactions.iter_mut().enumerate() {
            tx.transaction_id = format!("tx_{i:08}");
        }

        self.inject_fraud(&mut transactions, &customers, &terminals);

        let frauds = transactions.iter().filter(|t| t.label == Some(true)).count();
        info!(
            transactions = transactions.len(),
            frauds = frauds,
            customers = customers.len(),
            terminals = terminals.len(),
            "Synthetic dataset generated"
        );
        transactions
    }

    fn terminals(&mut self) -> Vec<Terminal> {
        (0..self.config.n_terminals)
            .map(|i| Terminal {
                id: format!("T{i:05}"),
                x: self.rng.gen_range(0.0..GRID),
                y: self.rng.gen_range(0.0..GRID),
            })
            .collect()
    }

    fn customers(&mut self, terminals: &[Terminal]) -> Vec<CustomerProfile> {
        let radius_sq = self.config.radius * self.config.radius;
        (0..self.config.n_customers)
            .map(|i| {
                let (x, y) = (self.rng.gen_range(0.0..GRID), self.rng.gen_range(0.0..GRID));
                let mean_amount = self.rng.gen_range(5.0..100.0);
                let std_amount = mean_amount / 2.0;
                let tx_per_day = self.rng.gen_range(0.0..4.0);
                let reachable = terminals
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| (t.x - x).powi(2) + (t.y - y).powi(2) <= radius_sq)
                    .map(|(idx, _)| idx)
                    .collect();
                CustomerProfile {
                    id: format!("C{i:05}"),
                    mean_amount,
                    std_amount,
                    tx_per_day,
                    terminals: reachable,
                }
            })
            .collect()
    }

    fn customer_transactions(
        &mut self,
        customer: &CustomerProfile,
        terminals: &[Terminal],
        out: &mut Vec<Transaction>,
    ) {
        if customer.terminals.is_empty() {
            return;
        }
        for day in 0..self.config.n_days {
            let count = self.poisson(customer.tx_per_day);
            for _ in 0..count {
                // transactions cluster around midday
                let second = self.normal(SECONDS_PER_DAY / 2.0, 20_000.0);
                if !(0.0..SECONDS_PER_DAY).contains(&second) {
                    continue;
                }
                let mut amount = self.normal(customer.mean_amount, customer.std_amount);
                if amount < 0.0 {
                    amount = self.rng.gen_range(0.0..customer.mean_amount * 2.0);
                }
                let amount = (amount * 100.0).round() / 100.0;

                let terminal = &terminals[customer.terminals[self.rng.gen_range(0..customer.terminals.len())]];
                let timestamp = self.config.start
                    + Duration::days(i64::from(day))
                    + Duration::seconds(second as i64);

                out.push(
                    Transaction::new("", &customer.id, &terminal.id, amount, timestamp).with_label(false),
                );
            }
        }
    }

    fn inject_fraud(
        &mut self,
        transactions: &mut [Transaction],
        customers: &[CustomerProfile],
        terminals: &[Terminal],
    ) {
        for tx in transactions.iter_mut() {
            if tx.amount > self.config.large_amount_threshold {
                tx.label = Some(true);
            }
        }

        for day in 0..self.config.n_days {
            let from = self.config.start + Duration::days(i64::from(day));

            let terminal_until = from + Duration::days(i64::from(self.config.terminal_compromise_days));
            let picks = self.config.compromised_terminals_per_day.min(terminals.len());
            for idx in index::sample(&mut self.rng, terminals.len(), picks) {
                let id = &terminals[idx].id;
                for tx in transactions.iter_mut() {
                    if &tx.terminal_id == id && tx.timestamp >= from && tx.timestamp < terminal_until {
                        tx.label = Some(true);
                    }
                }
            }

            let customer_until = from + Duration::days(i64::from(self.config.customer_compromise_days));
            let picks = self.config.compromised_customers_per_day.min(customers.len());
            for idx in index::sample(&mut self.rng, customers.len(), picks) {
                let id = &customers[idx].id;
                let window: Vec<usize> = transactions
                    .iter()
                    .enumerate()
                    .filter(|(_, tx)| &tx.customer_id == id && tx.timestamp >= from && tx.timestamp < customer_until)
                    .map(|(i, _)| i)
                    .collect();
                let hits = window.len() / 3;
                for pick in index::sample(&mut self.rng, window.len(), hits) {
                    let tx = &mut transactions[window[pick]];
                    tx.amount = (tx.amount * 5.0 * 100.0).round() / 100.0;
                    tx.label = Some(true);
                }
            }
        }
    }

    /// Knuth's method; fine for the small rates used here.
    fn poisson(&mut self, lambda: f64) -> u32 {
        if lambda <= 0.0 {
            return 0;
        }
        let limit = (-lambda).exp();
        let mut k = 0;
        let mut p = 1.0;
        loop {
            p *= self.rng.gen::<f64>();
            if p <= limit {
                return k;
            }
            k += 1;
        }
    }

    /// Box-Muller transform
    fn normal(&mut self, mean: f64, std: f64) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        mean + std * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}
