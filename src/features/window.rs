//! Per-entity sliding-window aggregates.
//!
//! Each entity (a customer or a terminal) keeps its recent `(timestamp, amount)`
//! observations in time order, together with running sums, sums of squares and
//! a monotonic maximum deque for every configured window. A window's cursor
//! only ever moves forward, so a full replay costs amortized O(windows) per
//! observation instead of a rescan of the history.
//!
//! Queries never mutate state: they advance a local copy of each cursor.
//! Cursors, sums and the retained entries are committed only by `append`,
//! which keeps a scoring request that fails half-way free of side effects.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

/// Aggregates over one window. An empty window reports all zeros.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; 0 when fewer than two observations
    pub std: f64,
    pub max: f64,
}

impl WindowStats {
    pub const EMPTY: WindowStats = WindowStats {
        count: 0,
        mean: 0.0,
        std: 0.0,
        max: 0.0,
    };

    fn from_sums(count: usize, sum: f64, sum_sq: f64, max: f64) -> Self {
        if count == 0 {
            return Self::EMPTY;
        }
        let n = count as f64;
        let mean = sum / n;
        let std = if count < 2 {
            0.0
        } else {
            // rounding in the running sums can push the variance slightly below 0
            ((sum_sq - sum * sum / n) / (n - 1.0)).max(0.0).sqrt()
        };
        Self {
            count,
            mean,
            std,
            max,
        }
    }
}

#[derive(Debug, Clone)]
struct WindowAggregate {
    span: Duration,
    /// Sequence number of the oldest entry still inside the window
    cursor: u64,
    sum: f64,
    sum_sq: f64,
    /// (sequence, amount) in decreasing amount order
    maxima: VecDeque<(u64, f64)>,
}

impl WindowAggregate {
    fn new(span: Duration, cursor: u64) -> Self {
        Self {
            span,
            cursor,
            sum: 0.0,
            sum_sq: 0.0,
            maxima: VecDeque::new(),
        }
    }
}

/// Rolling history of a single entity.
#[derive(Debug, Clone)]
pub struct EntityWindowState {
    entries: VecDeque<(DateTime<Utc>, f64)>,
    /// Sequence number of `entries[0]`
    base_seq: u64,
    windows: Vec<WindowAggregate>,
    last_observed: Option<DateTime<Utc>>,
    /// Distinct ids on the other side of this entity's transactions
    counterparts: HashSet<String>,
}

impl EntityWindowState {
    fn new(spans: &[Duration]) -> Self {
        Self {
            entries: VecDeque::new(),
            base_seq: 0,
            windows: spans.iter().map(|&s| WindowAggregate::new(s, 0)).collect(),
            last_observed: None,
            counterparts: HashSet::new(),
        }
    }

    fn next_seq(&self) -> u64 {
        self.base_seq + self.entries.len() as u64
    }

    fn entry(&self, seq: u64) -> (DateTime<Utc>, f64) {
        self.entries[(seq - self.base_seq) as usize]
    }

    /// Instant of the most recent observation, if any
    pub fn last_observed(&self) -> Option<DateTime<Utc>> {
        self.last_observed
    }

    /// Number of observations currently retained (bounded by the max window)
    pub fn retained(&self) -> usize {
        self.entries.len()
    }

    pub fn counterpart_count(&self) -> usize {
        self.counterparts.len()
    }

    pub fn has_counterpart(&self, id: &str) -> bool {
        self.counterparts.contains(id)
    }

    /// Slide `agg`'s cursor past entries older than `horizon`, returning the
    /// new cursor and the sums over what remains.
    fn advance(&self, agg: &WindowAggregate, horizon: DateTime<Utc>) -> (u64, f64, f64) {
        let end = self.next_seq();
        let (mut cursor, mut sum, mut sum_sq) = (agg.cursor, agg.sum, agg.sum_sq);
        while cursor < end {
            let (ts, amount) = self.entry(cursor);
            if ts >= horizon {
                break;
            }
            sum -= amount;
            sum_sq -= amount * amount;
            cursor += 1;
        }
        (cursor, sum, sum_sq)
    }

    fn stats_for(&self, agg: &WindowAggregate, as_of: DateTime<Utc>) -> WindowStats {
        let (cursor, sum, sum_sq) = self.advance(agg, as_of - agg.span);
        let count = (self.next_seq() - cursor) as usize;
        let max = agg
            .maxima
            .iter()
            .find(|(seq, _)| *seq >= cursor)
            .map(|&(_, amount)| amount)
            .unwrap_or(0.0);

        WindowStats::from_sums(count, sum, sum_sq, max)
    }

    fn scan(&self, span: Duration, as_of: DateTime<Utc>) -> WindowStats {
        let horizon = as_of - span;
        let (mut count, mut sum, mut sum_sq, mut max) = (0usize, 0.0, 0.0, 0.0f64);
        for &(ts, amount) in self.entries.iter().rev() {
            if ts < horizon {
                break;
            }
            count += 1;
            sum += amount;
            sum_sq += amount * amount;
            max = max.max(amount);
        }
        WindowStats::from_sums(count, sum, sum_sq, max)
    }

    fn ensure_not_stale(&self, entity: &str, as_of: DateTime<Utc>) -> Result<()> {
        match self.last_observed {
            Some(last) if as_of < last => Err(PipelineError::StaleEntityQuery {
                entity: entity.to_string(),
                as_of,
                last_observed: last,
            }),
            _ => Ok(()),
        }
    }

    fn append(&mut self, timestamp: DateTime<Utc>, amount: f64) {
        // every later query is at or after `timestamp`, so expired entries
        // can be committed out of each window now
        for i in 0..self.windows.len() {
            let (cursor, sum, sum_sq) = self.advance(&self.windows[i], timestamp - self.windows[i].span);
            let end = self.next_seq();

            let agg = &mut self.windows[i];
            agg.cursor = cursor;
            if cursor == end {
                agg.sum = 0.0;
                agg.sum_sq = 0.0;
            } else {
                agg.sum = sum;
                agg.sum_sq = sum_sq;
            }
            while matches!(agg.maxima.front(), Some(&(seq, _)) if seq < cursor) {
                agg.maxima.pop_front();
            }
        }

        let seq = self.next_seq();
        self.entries.push_back((timestamp, amount));
        for agg in &mut self.windows {
            agg.sum += amount;
            agg.sum_sq += amount * amount;
            while matches!(agg.maxima.back(), Some(&(_, v)) if v <= amount) {
                agg.maxima.pop_back();
            }
            agg.maxima.push_back((seq, amount));
        }

        // the widest window has the smallest cursor
        let keep_from = self
            .windows
            .iter()
            .map(|agg| agg.cursor)
            .min()
            .unwrap_or(seq);
        while self.base_seq < keep_from {
            self.entries.pop_front();
            self.base_seq += 1;
        }

        self.last_observed = Some(timestamp);
    }
}

/// Entity key → rolling state, for one entity dimension.
#[derive(Debug, Clone)]
pub struct EntityWindowStore {
    windows_days: Vec<u32>,
    spans: Vec<Duration>,
    max_span: Duration,
    states: HashMap<String, EntityWindowState>,
}

impl EntityWindowStore {
    /// Create a store answering the given window sizes (days).
    pub fn new(windows_days: &[u32]) -> Result<Self> {
        if windows_days.is_empty() {
            return Err(PipelineError::invalid_config("window list is empty"));
        }
        if windows_days.contains(&0) {
            return Err(PipelineError::invalid_config(
                "window sizes must be positive",
            ));
        }

        let spans: Vec<Duration> = windows_days
            .iter()
            .map(|&d| Duration::days(i64::from(d)))
            .collect();
        let max_span = spans.iter().copied().max().unwrap_or_else(Duration::zero);

        Ok(Self {
            windows_days: windows_days.to_vec(),
            spans,
            max_span,
            states: HashMap::new(),
        })
    }

    /// Configured window sizes in days, in configured order
    pub fn windows(&self) -> &[u32] {
        &self.windows_days
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, key: &str) -> Option<&EntityWindowState> {
        self.states.get(key)
    }

    pub fn last_observed(&self, key: &str) -> Option<DateTime<Utc>> {
        self.states.get(key).and_then(|s| s.last_observed)
    }

    /// Total observations ever recorded for `key`. Changes on every append,
    /// so equal counts mean the entity's window state has not moved.
    pub fn observations(&self, key: &str) -> u64 {
        self.states.get(key).map(EntityWindowState::next_seq).unwrap_or(0)
    }

    /// `StaleEntityQuery` if `key` already holds an observation later than `as_of`.
    pub fn ensure_not_stale(&self, key: &str, as_of: DateTime<Utc>) -> Result<()> {
        match self.states.get(key) {
            Some(state) => state.ensure_not_stale(key, as_of),
            None => Ok(()),
        }
    }

    /// Record an observation. Observations for one entity must arrive in
    /// non-decreasing time order.
    pub fn append(&mut self, key: &str, timestamp: DateTime<Utc>, amount: f64) -> Result<()> {
        self.ensure_not_stale(key, timestamp)?;
        let spans = &self.spans;
        self.states
            .entry(key.to_string())
            .or_insert_with(|| EntityWindowState::new(spans))
            .append(timestamp, amount);
        Ok(())
    }

    /// Remember that `key` transacted with `counterpart`.
    pub fn link(&mut self, key: &str, counterpart: &str) {
        let spans = &self.spans;
        let state = self
            .states
            .entry(key.to_string())
            .or_insert_with(|| EntityWindowState::new(spans));
        if !state.counterparts.contains(counterpart) {
            state.counterparts.insert(counterpart.to_string());
        }
    }

    pub fn counterpart_count(&self, key: &str) -> usize {
        self.states
            .get(key)
            .map(EntityWindowState::counterpart_count)
            .unwrap_or(0)
    }

    pub fn has_counterpart(&self, key: &str, counterpart: &str) -> bool {
        self.states
            .get(key)
            .map(|s| s.has_counterpart(counterpart))
            .unwrap_or(false)
    }

    /// Aggregates over observations with `timestamp <= as_of` and
    /// `as_of - timestamp <= window_days`.
    pub fn query(&self, key: &str, as_of: DateTime<Utc>, window_days: u32) -> Result<WindowStats> {
        let span = Duration::days(i64::from(window_days));
        if span > self.max_span {
            return Err(PipelineError::invalid_config(format!(
                "window of {window_days} days exceeds the largest configured window"
            )));
        }

        let Some(state) = self.states.get(key) else {
            return Ok(WindowStats::EMPTY);
        };
        state.ensure_not_stale(key, as_of)?;

        match self.windows_days.iter().position(|&d| d == window_days) {
            Some(idx) => Ok(state.stats_for(&state.windows[idx], as_of)),
            None => Ok(state.scan(span, as_of)),
        }
    }

    /// Aggregates for every configured window, in configured order.
    pub fn query_all(&self, key: &str, as_of: DateTime<Utc>) -> Result<Vec<WindowStats>> {
        let Some(state) = self.states.get(key) else {
            return Ok(vec![WindowStats::EMPTY; self.spans.len()]);
        };
        state.ensure_not_stale(key, as_of)?;

        Ok(state
            .windows
            .iter()
            .map(|agg| state.stats_for(agg, as_of))
            .collect())
    }
}
