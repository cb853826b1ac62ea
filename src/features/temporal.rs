//! Temporal feature engine: calendar features plus causal window aggregates
//! for the customer and terminal of each transaction.
//!
//! For every transaction the customer's and terminal's windows are queried
//! before the transaction is appended to either store, so a transaction never
//! contributes to its own rolling statistics.

use super::shard_for;
use super::window::{EntityWindowStore, WindowStats};
use crate::error::Result;
use crate::types::Transaction;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::thread;
use tracing::debug;

/// Calendar features, computed in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalendarFeatures {
    pub hour: u32,
    /// Monday = 0 ... Sunday = 6
    pub day_of_week: u32,
    pub is_weekend: bool,
}

impl CalendarFeatures {
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        let day_of_week = ts.weekday().num_days_from_monday();
        Self {
            hour: ts.hour(),
            day_of_week,
            is_weekend: day_of_week >= 5,
        }
    }
}

/// Customer-side state as of (and excluding) the current transaction
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomerFeatures {
    /// One entry per configured window, in configured order
    pub windows: Vec<WindowStats>,
    pub previous_tx: Option<DateTime<Utc>>,
    /// Distinct terminals including the current one
    pub unique_terminals: usize,
    /// First time this customer pays at this terminal
    pub is_new_terminal: bool,
}

/// Terminal-side state as of (and excluding) the current transaction
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TerminalFeatures {
    pub windows: Vec<WindowStats>,
    /// Distinct customers including the current one
    pub unique_customers: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalFeatures {
    pub calendar: CalendarFeatures,
    pub customer: CustomerFeatures,
    pub terminal: TerminalFeatures,
}

pub(crate) fn customer_side(store: &EntityWindowStore, tx: &Transaction) -> Result<CustomerFeatures> {
    let windows = store.query_all(&tx.customer_id, tx.timestamp)?;
    let known = store.has_counterpart(&tx.customer_id, &tx.terminal_id);
    Ok(CustomerFeatures {
        windows,
        previous_tx: store.last_observed(&tx.customer_id),
        unique_terminals: store.counterpart_count(&tx.customer_id) + usize::from(!known),
        is_new_terminal: !known,
    })
}

pub(crate) fn terminal_side(store: &EntityWindowStore, tx: &Transaction) -> Result<TerminalFeatures> {
    let windows = store.query_all(&tx.terminal_id, tx.timestamp)?;
    let known = store.has_counterpart(&tx.terminal_id, &tx.customer_id);
    Ok(TerminalFeatures {
        windows,
        unique_customers: store.counterpart_count(&tx.terminal_id) + usize::from(!known),
    })
}

/// Append `tx` to both entity stores. Ordering is checked for both entities
/// before either store is touched, so the update is all-or-nothing.
pub(crate) fn commit_pair(
    customers: &mut EntityWindowStore,
    terminals: &mut EntityWindowStore,
    tx: &Transaction,
) -> Result<()> {
    customers.ensure_not_stale(&tx.customer_id, tx.timestamp)?;
    terminals.ensure_not_stale(&tx.terminal_id, tx.timestamp)?;

    customers.append(&tx.customer_id, tx.timestamp, tx.amount)?;
    customers.link(&tx.customer_id, &tx.terminal_id);
    terminals.append(&tx.terminal_id, tx.timestamp, tx.amount)?;
    terminals.link(&tx.terminal_id, &tx.customer_id);
    Ok(())
}

/// Owns the customer and terminal stores for sequential processing.
#[derive(Debug, Clone)]
pub struct TemporalFeatureEngine {
    customers: EntityWindowStore,
    terminals: EntityWindowStore,
}

impl TemporalFeatureEngine {
    pub fn new(windows_days: &[u32]) -> Result<Self> {
        Ok(Self {
            customers: EntityWindowStore::new(windows_days)?,
            terminals: EntityWindowStore::new(windows_days)?,
        })
    }

    pub fn windows(&self) -> &[u32] {
        self.customers.windows()
    }

    pub fn customers(&self) -> &EntityWindowStore {
        &self.customers
    }

    pub fn terminals(&self) -> &EntityWindowStore {
        &self.terminals
    }

    /// Features for `tx` against the current state, without recording it.
    pub fn snapshot(&self, tx: &Transaction) -> Result<TemporalFeatures> {
        Ok(TemporalFeatures {
            calendar: CalendarFeatures::from_timestamp(tx.timestamp),
            customer: customer_side(&self.customers, tx)?,
            terminal: terminal_side(&self.terminals, tx)?,
        })
    }

    /// Record `tx` in both stores.
    pub fn commit(&mut self, tx: &Transaction) -> Result<()> {
        commit_pair(&mut self.customers, &mut self.terminals, tx)
    }

    /// Snapshot, then commit.
    pub fn observe(&mut self, tx: &Transaction) -> Result<TemporalFeatures> {
        let features = self.snapshot(tx)?;
        self.commit(tx)?;
        Ok(features)
    }

    /// Process a chronologically sorted batch on `workers` threads.
    ///
    /// Runs one pass over customers and one over terminals. Each pass shards
    /// entities by key hash so every entity's history is owned by exactly one
    /// worker; within a shard, transactions are replayed in input order.
    /// The output is identical to calling [`observe`](Self::observe) on each
    /// transaction in turn.
    pub fn process_batch(
        windows_days: &[u32],
        transactions: &[Transaction],
        workers: usize,
    ) -> Result<Vec<TemporalFeatures>> {
        // validates the window list before any thread starts
        EntityWindowStore::new(windows_days)?;

        let workers = workers.max(1);
        let customer_shards = partition(transactions, workers, |tx| &tx.customer_id);
        let terminal_shards = partition(transactions, workers, |tx| &tx.terminal_id);

        let (customer_results, terminal_results) = thread::scope(|scope| {
            let customer_handles: Vec<_> = customer_shards
                .iter()
                .map(|indices| {
                    scope.spawn(move || replay_customers(windows_days, transactions, indices))
                })
                .collect();
            let terminal_handles: Vec<_> = terminal_shards
                .iter()
                .map(|indices| {
                    scope.spawn(move || replay_terminals(windows_days, transactions, indices))
                })
                .collect();

            let customers: Vec<_> = customer_handles.into_iter().map(join_shard).collect();
            let terminals: Vec<_> = terminal_handles.into_iter().map(join_shard).collect();
            (customers, terminals)
        });

        let mut customers = vec![CustomerFeatures::default(); transactions.len()];
        for shard in customer_results {
            for (idx, features) in shard? {
                customers[idx] = features;
            }
        }
        let mut terminals = vec![TerminalFeatures::default(); transactions.len()];
        for shard in terminal_results {
            for (idx, features) in shard? {
                terminals[idx] = features;
            }
        }

        debug!(
            transactions = transactions.len(),
            workers = workers,
            "Temporal batch processed"
        );

        Ok(transactions
            .iter()
            .zip(customers)
            .zip(terminals)
            .map(|((tx, customer), terminal)| TemporalFeatures {
                calendar: CalendarFeatures::from_timestamp(tx.timestamp),
                customer,
                terminal,
            })
            .collect())
    }
}

fn partition<'a, F>(transactions: &'a [Transaction], shards: usize, key: F) -> Vec<Vec<usize>>
where
    F: Fn(&'a Transaction) -> &'a String,
{
    let mut out = vec![Vec::new(); shards];
    for (idx, tx) in transactions.iter().enumerate() {
        out[shard_for(key(tx), shards)].push(idx);
    }
    out
}

fn join_shard<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}

fn replay_customers(
    windows_days: &[u32],
    transactions: &[Transaction],
    indices: &[usize],
) -> Result<Vec<(usize, CustomerFeatures)>> {
    let mut store = EntityWindowStore::new(windows_days)?;
    let mut out = Vec::with_capacity(indices.len());
    for &idx in indices {
        let tx = &transactions[idx];
        out.push((idx, customer_side(&store, tx)?));
        store.append(&tx.customer_id, tx.timestamp, tx.amount)?;
        store.link(&tx.customer_id, &tx.terminal_id);
    }
    Ok(out)
}

fn replay_terminals(
    windows_days: &[u32],
    transactions: &[Transaction],
    indices: &[usize],
) -> Result<Vec<(usize, TerminalFeatures)>> {
    let mut store = EntityWindowStore::new(windows_days)?;
    let mut out = Vec::with_capacity(indices.len());
    for &idx in indices {
        let tx = &transactions[idx];
        out.push((idx, terminal_side(&store, tx)?));
        store.append(&tx.terminal_id, tx.timestamp, tx.amount)?;
        store.link(&tx.terminal_id, &tx.customer_id);
    }
    Ok(out)
}
