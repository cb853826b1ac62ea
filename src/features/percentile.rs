//! Amount percentile ranks.
//!
//! Offline, the rank is taken among the amounts seen so far in the batch
//! (never later ones). Live, it is approximated against a reference snapshot
//! supplied from outside, since the true global rank is unknowable online.

use serde::{Deserialize, Serialize};

/// Rank among amounts seen so far, in (0, 1].
///
/// The amounts a batch can contain are known up front, so they are
/// coordinate-compressed into a Fenwick tree: each observation is one point
/// update and one prefix sum, O(log n).
#[derive(Debug, Clone, Default)]
pub struct RunningRank {
    /// Distinct finite amounts, ascending
    values: Vec<f64>,
    /// 1-based Fenwick tree of observation counts per distinct amount
    tree: Vec<usize>,
    len: usize,
}

impl RunningRank {
    /// Rank structure able to record any amount in `universe`.
    pub fn with_universe(universe: &[f64]) -> Self {
        let mut values: Vec<f64> = universe.iter().copied().filter(|a| a.is_finite()).collect();
        values.sort_by(f64::total_cmp);
        values.dedup();
        let tree = vec![0; values.len() + 1];
        Self {
            values,
            tree,
            len: 0,
        }
    }

    /// Rank of each amount among itself and the amounts before it.
    pub fn causal_percentiles(amounts: &[f64]) -> Vec<f64> {
        let mut rank = Self::with_universe(amounts);
        amounts.iter().map(|&amount| rank.observe(amount)).collect()
    }

    /// Insert `amount` and return its rank among everything inserted so far.
    /// An amount outside the universe is ranked but not recorded.
    pub fn observe(&mut self, amount: f64) -> f64 {
        // slot of the largest distinct value <= amount
        let slot = self.values.partition_point(|&v| v <= amount);
        let at_or_below = self.prefix(slot);

        if slot > 0 && self.values[slot - 1] == amount {
            self.add(slot);
            self.len += 1;
            (at_or_below + 1) as f64 / self.len as f64
        } else {
            (at_or_below + 1) as f64 / (self.len + 1) as f64
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn add(&mut self, slot: usize) {
        let mut i = slot;
        while i < self.tree.len() {
            self.tree[i] += 1;
            i += i & i.wrapping_neg();
        }
    }

    fn prefix(&self, slot: usize) -> usize {
        let mut i = slot;
        let mut total = 0;
        while i > 0 {
            total += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        total
    }
}

/// Frozen amount distribution used for live percentile ranks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDistribution {
    sorted: Vec<f64>,
}

impl ReferenceDistribution {
    /// Snapshot a set of amounts; non-finite values are dropped.
    pub fn from_amounts<I: IntoIterator<Item = f64>>(amounts: I) -> Self {
        let mut sorted: Vec<f64> = amounts.into_iter().filter(|a| a.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);
        Self { sorted }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Rank of `amount` as if it were appended to the reference, in (0, 1].
    pub fn percentile(&self, amount: f64) -> f64 {
        let at_or_below = self.sorted.partition_point(|&v| v <= amount);
        (at_or_below + 1) as f64 / (self.sorted.len() + 1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn naive_ranks(amounts: &[f64]) -> Vec<f64> {
        let mut sorted: Vec<f64> = Vec::new();
        amounts
            .iter()
            .map(|&amount| {
                let pos = sorted.partition_point(|&v| v <= amount);
                sorted.insert(pos, amount);
                (pos + 1) as f64 / sorted.len() as f64
            })
            .collect()
    }

    #[test]
    fn test_running_rank_uses_only_past() {
        let mut rank = RunningRank::with_universe(&[50.0, 10.0, 30.0]);
        assert_eq!(rank.observe(50.0), 1.0);
        assert_eq!(rank.observe(10.0), 0.5);
        // 30 is above 10, below 50: second of three
        assert!((rank.observe(30.0) - 2.0 / 3.0).abs() < 1e-12);
        // ties count as at-or-below
        assert_eq!(rank.observe(50.0), 1.0);
        assert_eq!(rank.len(), 4);
    }

    #[test]
    fn test_fenwick_ranks_match_sorted_insertion() {
        let mut rng = StdRng::seed_from_u64(17);
        // few distinct values so ties are frequent
        let amounts: Vec<f64> = (0..2_000)
            .map(|_| f64::from(rng.gen_range(0..150u32)) * 2.5)
            .collect();

        let fast = RunningRank::causal_percentiles(&amounts);
        let naive = naive_ranks(&amounts);
        assert_eq!(fast.len(), naive.len());
        for (i, (a, b)) in fast.iter().zip(&naive).enumerate() {
            assert!((a - b).abs() < 1e-12, "row {i}: {a} vs {b}");
        }
    }

    #[test]
    fn test_amount_outside_universe_is_not_recorded() {
        let mut rank = RunningRank::with_universe(&[10.0, 20.0]);
        rank.observe(10.0);
        rank.observe(20.0);
        assert!((rank.observe(15.0) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(rank.len(), 2);
        // 15 left no trace
        assert_eq!(rank.observe(10.0), 2.0 / 3.0);
    }

    #[test]
    fn test_reference_percentile() {
        let reference = ReferenceDistribution::from_amounts(vec![40.0, 10.0, 30.0, 20.0]);
        assert!((reference.percentile(5.0) - 0.2).abs() < 1e-12);
        assert!((reference.percentile(25.0) - 0.6).abs() < 1e-12);
        assert_eq!(reference.percentile(1000.0), 1.0);
    }

    #[test]
    fn test_empty_reference() {
        let reference = ReferenceDistribution::from_amounts(Vec::new());
        assert_eq!(reference.percentile(42.0), 1.0);
    }
}
