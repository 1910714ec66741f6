//! Similarity signal sampling
//!
//! One sequential pass over the frame source, scoring every frame against
//! the reference template. The full sample sequence must exist before peak
//! detection can start, since the threshold is derived from its maximum.

use std::fs;
use std::path::Path;

use opencv::{core::Mat, imgcodecs, prelude::*};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::common::{Result, Sample, SlidesubError};
use crate::config::RegionRatios;
use crate::imaging;
use crate::video_stream::FrameSource;

/// Produces the per-frame similarity score in [0, 1]
pub trait RegionScorer {
    fn score(&mut self, frame: &Mat) -> Result<f64>;
}

impl<F> RegionScorer for F
where
    F: FnMut(&Mat) -> Result<f64>,
{
    fn score(&mut self, frame: &Mat) -> Result<f64> {
        self(frame)
    }
}

/// Scores the signal region against a binarized reference template
///
/// The crop is sharpened, binarized with Otsu's method and compared pixel
/// by pixel with the template resized to the crop's dimensions.
pub struct TemplateScorer {
    region: RegionRatios,
    reference: Mat,
}

impl TemplateScorer {
    pub fn new(region: RegionRatios, reference: Mat) -> Result<Self> {
        if reference.empty() {
            return Err(SlidesubError::ReferenceImage {
                path: "<memory>".to_string(),
                reason: "image is empty".to_string(),
            });
        }
        let reference = imaging::to_gray(&reference)?;
        Ok(Self { region, reference })
    }

    /// Load the template from disk as grayscale
    #[instrument(skip(region))]
    pub fn from_file(region: RegionRatios, path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy().to_string();
        if !path.is_file() {
            return Err(SlidesubError::ReferenceImage {
                path: path_str,
                reason: "file not found".to_string(),
            });
        }

        let reference = imgcodecs::imread(&path_str, imgcodecs::IMREAD_GRAYSCALE)?;
        if reference.empty() {
            return Err(SlidesubError::ReferenceImage {
                path: path_str,
                reason: "could not decode image".to_string(),
            });
        }

        debug!("Loaded reference template {}x{}", reference.cols(), reference.rows());
        Ok(Self { region, reference })
    }
}

impl RegionScorer for TemplateScorer {
    fn score(&mut self, frame: &Mat) -> Result<f64> {
        let crop = imaging::crop_region(frame, &self.region)?;
        let sharpened = imaging::sharpen(&crop)?;
        let binary = imaging::binarize(&sharpened)?;
        imaging::similarity(&binary, &self.reference)
    }
}

/// Score every frame of `source` from its current position to the end
///
/// Frame indices are assigned sequentially from 0.
#[instrument(skip(source, scorer))]
pub fn sample_signal<S, R>(source: &mut S, scorer: &mut R) -> Result<Vec<Sample>>
where
    S: FrameSource + ?Sized,
    R: RegionScorer + ?Sized,
{
    let total_frames = source.frame_count();
    let mut samples = Vec::with_capacity(total_frames as usize);
    let mut frame_index: u32 = 0;

    while let Some(frame) = source.read_frame()? {
        let score = scorer.score(&frame)
            .map_err(|e| SlidesubError::frame_error(frame_index, format!("Scoring failed: {}", e)))?;
        samples.push(Sample::new(frame_index, score));

        frame_index += 1;
        if frame_index % 1000 == 0 {
            debug!("Scored {}/{} frames", frame_index, total_frames);
        }
    }

    info!("Sampled {} frames", samples.len());
    Ok(samples)
}

/// Raw signal written for offline threshold tuning
#[derive(Debug, Serialize)]
pub struct SignalDump<'a> {
    pub fps: f64,
    pub max_score: Option<f64>,
    pub peak_threshold: Option<f64>,
    pub samples: &'a [Sample],
}

impl SignalDump<'_> {
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!("Wrote signal dump with {} samples to {}", self.samples.len(), path.display());
        Ok(())
    }
}
