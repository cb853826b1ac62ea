//! Chronological train / validation / test partitioning

use crate::config::SplitConfig;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Contiguous, non-overlapping position ranges over time-sorted rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalSplit {
    pub train: Range<usize>,
    pub validation: Range<usize>,
    pub test: Range<usize>,
}

impl TemporalSplit {
    /// Partition `timestamps` (which must already be sorted) by position.
    ///
    /// A boundary landing inside a run of equal timestamps is pushed past the
    /// run, so no instant is shared by two partitions.
    pub fn compute(timestamps: &[DateTime<Utc>], config: &SplitConfig) -> Result<Self> {
        config.validate()?;
        let n = timestamps.len();
        if n == 0 {
            return Err(PipelineError::EmptyDataset);
        }
        if let Some(pos) = timestamps.windows(2).position(|w| w[1] < w[0]) {
            return Err(PipelineError::invalid_config(format!(
                "rows must be sorted by timestamp before splitting (row {} at {} follows {})",
                pos + 1,
                timestamps[pos + 1],
                timestamps[pos]
            )));
        }

        let train_end = advance_past_ties(timestamps, portion(n, config.train).min(n));
        let val_end = advance_past_ties(
            timestamps,
            (train_end + portion(n, config.validation)).min(n),
        );

        Ok(Self {
            train: 0..train_end,
            validation: train_end..val_end,
            test: val_end..n,
        })
    }

    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.train.len(), self.validation.len(), self.test.len())
    }
}

fn portion(n: usize, ratio: f64) -> usize {
    (n as f64 * ratio).round() as usize
}

fn advance_past_ties(timestamps: &[DateTime<Utc>], mut boundary: usize) -> usize {
    while boundary > 0 && boundary < timestamps.len() && timestamps[boundary] == timestamps[boundary - 1] {
        boundary += 1;
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn hourly(n: usize) -> Vec<DateTime<Utc>> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n).map(|i| start + Duration::hours(i as i64)).collect()
    }

    #[test]
    fn test_default_ratios_on_1000_rows() {
        let ts = hourly(1000);
        let split = TemporalSplit::compute(&ts, &SplitConfig::default()).unwrap();

        assert_eq!(split.sizes(), (700, 150, 150));
        assert!(ts[split.train.end - 1] < ts[split.validation.start]);
        assert!(ts[split.validation.end - 1] < ts[split.test.start]);
        assert_eq!(split.test.end, 1000);
    }

    #[test]
    fn test_boundary_moves_past_equal_timestamps() {
        let mut ts = hourly(10);
        // rows 6, 7 and 8 share an instant
        ts[7] = ts[6];
        ts[8] = ts[6];
        let config = SplitConfig {
            train: 0.7,
            validation: 0.2,
            test: 0.1,
            ..SplitConfig::default()
        };
        let split = TemporalSplit::compute(&ts, &config).unwrap();

        assert_eq!(split.train, 0..9);
        assert_eq!(split.validation, 9..10);
        assert!(split.test.is_empty());
    }

    #[test]
    fn test_unsorted_input_rejected() {
        let mut ts = hourly(5);
        ts.swap(1, 3);
        assert!(matches!(
            TemporalSplit::compute(&ts, &SplitConfig::default()),
            Err(PipelineError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            TemporalSplit::compute(&[], &SplitConfig::default()),
            Err(PipelineError::EmptyDataset)
        ));
    }
}
