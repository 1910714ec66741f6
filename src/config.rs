//! Pipeline configuration
//!
//! All tunables of the pipeline live in [`PipelineConfig`]. It deserializes
//! from a JSON file (missing keys fall back to defaults) and is validated
//! once, up front, so that a bad value halts the run before any output file
//! is touched.

use std::fs;
use std::path::{Path, PathBuf};

use opencv::core::Rect;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::common::{Result, SlidesubError};
use crate::deduplicator::CaptureOptions;
use crate::interval_merger::MergePolicy;

pub const DEFAULT_PEAK_RATIO: f64 = 0.97;
/// Ratios below this are accepted but flagged as weakly discriminating
pub const LOW_PEAK_RATIO: f64 = 0.8;
pub const DEFAULT_END_DELAY_SECONDS: f64 = 0.09;
pub const DEFAULT_DEDUPE_THRESHOLD: f64 = 0.996;
pub const DEFAULT_CAPTURE_FRAME_OFFSET: u32 = 2;

// Layout the default regions were measured on
const LAYOUT_WIDTH: f64 = 294.0;
const LAYOUT_HEIGHT: f64 = 640.0;

/// A rectangle expressed as fractions of the frame size
///
/// `(x1, y1)` is the top-left corner and `(x2, y2)` the bottom-right one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionRatios {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl RegionRatios {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Speaker indicator region scored against the reference template
    pub fn default_signal() -> Self {
        Self::new(
            254.0 / LAYOUT_WIDTH,
            481.0 / LAYOUT_HEIGHT,
            275.6 / LAYOUT_WIDTH,
            505.0 / LAYOUT_HEIGHT,
        )
    }

    /// Dialogue box region captured as a slide
    pub fn default_slide() -> Self {
        Self::new(
            24.0 / LAYOUT_WIDTH,
            410.0 / LAYOUT_HEIGHT,
            260.0 / LAYOUT_WIDTH,
            495.0 / LAYOUT_HEIGHT,
        )
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        if coords.iter().any(|c| !c.is_finite() || *c < 0.0 || *c > 1.0) {
            return Err(SlidesubError::config_error(format!(
                "{} ratios must lie in [0, 1], got {:?}", name, self
            )));
        }
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return Err(SlidesubError::config_error(format!(
                "{} must have x1 < x2 and y1 < y2, got {:?}", name, self
            )));
        }
        Ok(())
    }

    /// Resolve to a pixel rectangle for a `width` x `height` frame
    ///
    /// Corners are truncated toward zero. A region that collapses to zero
    /// pixels at this resolution is a geometry error.
    pub fn to_rect(&self, width: i32, height: i32) -> Result<Rect> {
        let x1 = (self.x1 * width as f64) as i32;
        let y1 = (self.y1 * height as f64) as i32;
        let x2 = ((self.x2 * width as f64) as i32).min(width);
        let y2 = ((self.y2 * height as f64) as i32).min(height);

        if x2 <= x1 || y2 <= y1 {
            return Err(SlidesubError::geometry_error(format!(
                "region {:?} is empty on a {}x{} frame", self, width, height
            )));
        }

        Ok(Rect::new(x1, y1, x2 - x1, y2 - y1))
    }
}

/// Required frame aspect ratio (`width / height`) with absolute tolerance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectRatio {
    pub width: f64,
    pub height: f64,
    #[serde(default = "AspectRatio::default_tolerance")]
    pub tolerance: f64,
}

impl AspectRatio {
    fn default_tolerance() -> f64 {
        0.05
    }

    pub fn portrait_9_16() -> Self {
        Self { width: 9.0, height: 16.0, tolerance: Self::default_tolerance() }
    }

    pub fn ratio(&self) -> f64 {
        self.width / self.height
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        if height == 0 {
            return false;
        }
        (width as f64 / height as f64 - self.ratio()).abs() < self.tolerance
    }

    /// Fail with a geometry error when the frame size does not match
    pub fn check(&self, width: u32, height: u32) -> Result<()> {
        if self.matches(width, height) {
            Ok(())
        } else {
            Err(SlidesubError::geometry_error(format!(
                "frame {}x{} is not {}:{} (tolerance {})",
                width, height, self.width, self.height, self.tolerance
            )))
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Fraction of the maximum score a frame must reach to count as "on"
    pub peak_ratio: f64,
    pub merge_policy: MergePolicy,
    /// Added to every subtitle end time
    pub end_delay_seconds: f64,
    pub slides_enabled: bool,
    pub dedupe_enabled: bool,
    pub dedupe_threshold: f64,
    pub signal_region: RegionRatios,
    pub slide_region: RegionRatios,
    /// Frames skipped past an interval start before capturing its slide
    pub frame_offset_for_capture: u32,
    /// Template the signal region is compared against
    pub reference_image: PathBuf,
    /// `None` disables the geometry check
    pub aspect_ratio: Option<AspectRatio>,
    /// Write the raw signal next to the subtitle file
    pub dump_signal: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            peak_ratio: DEFAULT_PEAK_RATIO,
            merge_policy: MergePolicy::default(),
            end_delay_seconds: DEFAULT_END_DELAY_SECONDS,
            slides_enabled: true,
            dedupe_enabled: true,
            dedupe_threshold: DEFAULT_DEDUPE_THRESHOLD,
            signal_region: RegionRatios::default_signal(),
            slide_region: RegionRatios::default_slide(),
            frame_offset_for_capture: DEFAULT_CAPTURE_FRAME_OFFSET,
            reference_image: PathBuf::from("reference.png"),
            aspect_ratio: Some(AspectRatio::portrait_9_16()),
            dump_signal: false,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration file and validate it
    #[instrument]
    pub fn from_file(path: &Path) -> Result<Self> {
        info!("Loading configuration from {}", path.display());

        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Check every value range; also warns on a low peak ratio
    pub fn validate(&self) -> Result<()> {
        validate_peak_ratio(self.peak_ratio)?;
        if self.peak_ratio < LOW_PEAK_RATIO {
            warn!("peak_ratio {} is below {}; expect more false-positive peaks",
                  self.peak_ratio, LOW_PEAK_RATIO);
        }

        self.merge_policy.validate()?;

        if !self.end_delay_seconds.is_finite() || self.end_delay_seconds <= 0.0 {
            return Err(SlidesubError::config_error(format!(
                "end_delay_seconds must be a positive number, got {}", self.end_delay_seconds
            )));
        }

        if !(0.0..=1.0).contains(&self.dedupe_threshold) {
            return Err(SlidesubError::config_error(format!(
                "dedupe_threshold must be in [0, 1], got {}", self.dedupe_threshold
            )));
        }

        self.signal_region.validate("signal_region")?;
        self.slide_region.validate("slide_region")?;

        if let Some(aspect) = &self.aspect_ratio {
            if !(aspect.width > 0.0 && aspect.height > 0.0 && aspect.tolerance >= 0.0) {
                return Err(SlidesubError::config_error(format!(
                    "aspect_ratio must have positive sides and non-negative tolerance, got {:?}",
                    aspect
                )));
            }
        }

        Ok(())
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            slide_region: self.slide_region,
            dedupe_enabled: self.dedupe_enabled,
            dedupe_threshold: self.dedupe_threshold,
            frame_offset: self.frame_offset_for_capture,
        }
    }
}

/// Shared range check for the peak ratio, `(0, 1]`
pub fn validate_peak_ratio(ratio: f64) -> Result<()> {
    if ratio > 0.0 && ratio <= 1.0 {
        Ok(())
    } else {
        Err(SlidesubError::config_error(format!(
            "peak_ratio must be in (0, 1], got {}", ratio
        )))
    }
}
