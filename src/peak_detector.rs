//! PeakDetector - run-length detection over the similarity signal
//!
//! The threshold is relative: a fraction of the highest score seen anywhere
//! in the signal. That makes detection independent of how well the template
//! matches in absolute terms, but it also means detection can only run once
//! the whole signal has been sampled.

use tracing::{instrument, debug, info, warn};

use crate::common::{Peak, Result, Sample, SlidesubError};
use crate::config::{validate_peak_ratio, LOW_PEAK_RATIO};

/// Thresholds a sampled signal into contiguous "on" runs
#[derive(Debug, Clone)]
pub struct PeakDetector {
    ratio: f64,
    max_score: Option<f64>,
    threshold: Option<f64>,
}

impl PeakDetector {
    /// Create a detector for `ratio` in `(0, 1]`
    ///
    /// # Errors
    /// * `InvalidConfiguration` - ratio outside `(0, 1]` or NaN
    #[instrument]
    pub fn new(ratio: f64) -> Result<Self> {
        validate_peak_ratio(ratio)?;

        if ratio < LOW_PEAK_RATIO {
            warn!("Peak ratio {} is below {}; detection will be less discriminating",
                  ratio, LOW_PEAK_RATIO);
        }

        Ok(Self {
            ratio,
            max_score: None,
            threshold: None,
        })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// True when the ratio is legal but likely to admit false positives
    pub fn is_low_ratio(&self) -> bool {
        self.ratio < LOW_PEAK_RATIO
    }

    /// Maximum score of the last detected signal
    pub fn max_score(&self) -> Option<f64> {
        self.max_score
    }

    /// Absolute threshold used by the last detection
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Find every maximal run of samples scoring at least `max * ratio`
    ///
    /// # Errors
    /// * `EmptySignal` - if `samples` is empty
    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    pub fn detect(&mut self, samples: &[Sample]) -> Result<Vec<Peak>> {
        let max_score = samples
            .iter()
            .map(|s| s.score)
            .fold(None, |acc: Option<f64>, score| Some(acc.map_or(score, |m| m.max(score))))
            .ok_or(SlidesubError::EmptySignal)?;

        let threshold = max_score * self.ratio;
        self.max_score = Some(max_score);
        self.threshold = Some(threshold);

        debug!("Max score {:.4}, peak threshold {:.4}", max_score, threshold);

        let mut peaks = Vec::new();
        let mut run_start: Option<u32> = None;
        let mut previous_frame = samples[0].frame_index;

        for sample in samples {
            if sample.score >= threshold {
                run_start.get_or_insert(sample.frame_index);
            } else if let Some(start) = run_start.take() {
                peaks.push(Peak::new(start, previous_frame));
            }
            previous_frame = sample.frame_index;
        }

        if let Some(start) = run_start {
            peaks.push(Peak::new(start, previous_frame));
        }

        info!("Detected {} peaks above {:.4}", peaks.len(), threshold);
        Ok(peaks)
    }
}

/// One-shot detection with a fresh detector
pub fn detect(samples: &[Sample], ratio: f64) -> Result<Vec<Peak>> {
    PeakDetector::new(ratio)?.detect(samples)
}
