//! Interval merging strategies
//!
//! Peaks are converted to seconds and folded into candidate dialogue
//! intervals. Two capture setups need two different folds, so the fold is a
//! [`MergeStrategy`] chosen by configuration:
//!
//! * [`GapMerge`] for a continuously lit indicator: peaks separated by a
//!   short silence belong to the same event.
//! * [`PairMerge`] for an indicator that flashes twice per dialogue box:
//!   peaks are paired as rising and falling edge, with a fallback for
//!   unpaired peaks.

use serde::{Deserialize, Serialize};
use tracing::{instrument, debug, info};

use crate::common::{Interval, Peak, Result, SlidesubError};

pub const DEFAULT_MERGE_GAP_SECONDS: f64 = 0.7;
pub const DEFAULT_PAIR_GAP_SECONDS: f64 = 1.0;
pub const DEFAULT_ISOLATION_GAP_SECONDS: f64 = 2.0;

/// Folds time-ordered peak intervals into candidate dialogue intervals
pub trait MergeStrategy: std::fmt::Debug {
    /// Stable name used in logs and reports
    fn name(&self) -> &'static str;

    fn merge(&self, intervals: &[Interval]) -> Vec<Interval>;
}

/// Merge neighbours whose silent gap is at most `gap_threshold` seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapMerge {
    pub gap_threshold: f64,
}

impl GapMerge {
    pub fn new(gap_threshold: f64) -> Self {
        Self { gap_threshold }
    }
}

impl Default for GapMerge {
    fn default() -> Self {
        Self::new(DEFAULT_MERGE_GAP_SECONDS)
    }
}

impl MergeStrategy for GapMerge {
    fn name(&self) -> &'static str {
        "gap"
    }

    fn merge(&self, intervals: &[Interval]) -> Vec<Interval> {
        let mut merged = Vec::new();
        let mut iter = intervals.iter().copied();

        let Some(mut current) = iter.next() else {
            return merged;
        };

        for next in iter {
            if next.start_time - current.end_time <= self.gap_threshold {
                current.extend_to(next.end_time);
            } else {
                merged.push(current);
                current = next;
            }
        }
        merged.push(current);

        merged
    }
}

/// Pair peaks as rising and falling edges of one dialogue box render
///
/// A peak followed within `pair_gap` seconds by another peak forms an
/// interval spanning both. A peak left without a partner is kept on its own
/// only if it is isolated, i.e. more than `isolation_gap` seconds away from
/// both neighbours; otherwise it is discarded as a stray edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairMerge {
    pub pair_gap: f64,
    pub isolation_gap: f64,
}

impl PairMerge {
    pub fn new(pair_gap: f64, isolation_gap: f64) -> Self {
        Self { pair_gap, isolation_gap }
    }
}

impl Default for PairMerge {
    fn default() -> Self {
        Self::new(DEFAULT_PAIR_GAP_SECONDS, DEFAULT_ISOLATION_GAP_SECONDS)
    }
}

/// What happened to a peak under [`PairMerge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakFate {
    Paired,
    Isolated,
    Discarded,
}

impl PairMerge {
    /// Classify every input interval; returns the merged output and the fate
    /// of each input in order
    pub fn merge_with_fates(&self, intervals: &[Interval]) -> (Vec<Interval>, Vec<PeakFate>) {
        let mut merged = Vec::new();
        let mut fates = Vec::with_capacity(intervals.len());
        let mut i = 0;

        while i < intervals.len() {
            let current = intervals[i];

            if let Some(next) = intervals.get(i + 1) {
                if next.start_time - current.end_time <= self.pair_gap {
                    merged.push(Interval::new(current.start_time, next.end_time.max(current.end_time)));
                    fates.push(PeakFate::Paired);
                    fates.push(PeakFate::Paired);
                    i += 2;
                    continue;
                }
            }

            let gap_before = i
                .checked_sub(1)
                .map(|p| current.start_time - intervals[p].end_time)
                .unwrap_or(f64::INFINITY);
            let gap_after = intervals
                .get(i + 1)
                .map(|n| n.start_time - current.end_time)
                .unwrap_or(f64::INFINITY);

            if gap_before > self.isolation_gap && gap_after > self.isolation_gap {
                debug!("Keeping isolated peak {:.3}s-{:.3}s", current.start_time, current.end_time);
                merged.push(current);
                fates.push(PeakFate::Isolated);
            } else {
                debug!("Discarding unpaired peak {:.3}s-{:.3}s (gap before {:.3}s, after {:.3}s)",
                       current.start_time, current.end_time, gap_before, gap_after);
                fates.push(PeakFate::Discarded);
            }
            i += 1;
        }

        (merged, fates)
    }
}

impl MergeStrategy for PairMerge {
    fn name(&self) -> &'static str {
        "pair"
    }

    fn merge(&self, intervals: &[Interval]) -> Vec<Interval> {
        self.merge_with_fates(intervals).0
    }
}

/// Serializable selection of a built-in strategy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MergePolicy {
    Gap {
        gap_seconds: f64,
    },
    Pair {
        pair_gap_seconds: f64,
        isolation_gap_seconds: f64,
    },
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy::Gap { gap_seconds: DEFAULT_MERGE_GAP_SECONDS }
    }
}

impl MergePolicy {
    pub fn default_pair() -> Self {
        MergePolicy::Pair {
            pair_gap_seconds: DEFAULT_PAIR_GAP_SECONDS,
            isolation_gap_seconds: DEFAULT_ISOLATION_GAP_SECONDS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let gaps: Vec<(&str, f64)> = match *self {
            MergePolicy::Gap { gap_seconds } => vec![("gap_seconds", gap_seconds)],
            MergePolicy::Pair { pair_gap_seconds, isolation_gap_seconds } => vec![
                ("pair_gap_seconds", pair_gap_seconds),
                ("isolation_gap_seconds", isolation_gap_seconds),
            ],
        };

        for (name, value) in &gaps {
            if !value.is_finite() || *value < 0.0 {
                return Err(SlidesubError::config_error(format!(
                    "merge policy {} must be a non-negative number, got {}", name, value
                )));
            }
        }
        Ok(())
    }

    pub fn build(&self) -> Box<dyn MergeStrategy> {
        match *self {
            MergePolicy::Gap { gap_seconds } => Box::new(GapMerge::new(gap_seconds)),
            MergePolicy::Pair { pair_gap_seconds, isolation_gap_seconds } => {
                Box::new(PairMerge::new(pair_gap_seconds, isolation_gap_seconds))
            }
        }
    }
}

/// Convert peaks to seconds at `fps` and fold them with `strategy`
///
/// # Errors
/// * `InvalidConfiguration` - if fps is not a positive number
#[instrument(skip(peaks, strategy), fields(peaks = peaks.len(), strategy = strategy.name()))]
pub fn merge(peaks: &[Peak], fps: f64, strategy: &dyn MergeStrategy) -> Result<Vec<Interval>> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(SlidesubError::config_error(format!("fps must be positive, got {}", fps)));
    }

    let intervals: Vec<Interval> = peaks.iter().map(|p| p.to_interval(fps)).collect();
    let merged = strategy.merge(&intervals);

    info!("Merged {} peaks into {} candidate intervals", peaks.len(), merged.len());
    Ok(merged)
}
