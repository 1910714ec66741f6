//! Dialogue timing and slide extraction for short vertical videos
//!
//! A small indicator region of every frame is compared against a reference
//! template. While a dialogue box is on screen the similarity signal sits
//! near its maximum; those runs become subtitle intervals, a snapshot of the
//! dialogue box is saved for each, and the intervals are written out as a
//! gapless SRT timeline.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use rust_slidesub::{process_video, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let report = process_video(Path::new("episode01.mp4"), &config)?;
//! println!("{} subtitles written to {}", report.entries.len(), report.srt_path.display());
//! # Ok::<(), rust_slidesub::SlidesubError>(())
//! ```
//!
//! The stages are also usable on their own, from a [`FrameSource`] or from an
//! already sampled signal:
//!
//! ```rust
//! use rust_slidesub::{assemble, detect, merge, render_srt, GapMerge, Sample};
//!
//! let scores = [0.1, 0.99, 0.99, 0.1, 0.1];
//! let samples: Vec<Sample> = scores.iter().enumerate()
//!     .map(|(i, &s)| Sample::new(i as u32, s))
//!     .collect();
//!
//! let peaks = detect(&samples, 0.97)?;
//! let intervals = merge(&peaks, 30.0, &GapMerge::default())?;
//! let srt = render_srt(&assemble(&intervals, 0.09));
//! assert!(srt.starts_with("1\n00:00:00,000 --> "));
//! # Ok::<(), rust_slidesub::SlidesubError>(())
//! ```

mod common;
mod config;
mod deduplicator;
mod imaging;
mod interval_merger;
mod peak_detector;
mod signal;
mod stitch;
mod timeline;
mod video_stream;

pub use common::{FrameTimecode, Interval, Peak, Result, Sample, SlidesubError};
pub use config::{
    validate_peak_ratio, AspectRatio, PipelineConfig, RegionRatios, DEFAULT_CAPTURE_FRAME_OFFSET,
    DEFAULT_DEDUPE_THRESHOLD, DEFAULT_END_DELAY_SECONDS, DEFAULT_PEAK_RATIO, LOW_PEAK_RATIO,
};
pub use deduplicator::{
    capture_and_dedupe, CaptureOptions, CaptureOutcome, SlideDeduplicator, SlideDirectory, SlideStore,
    VariantRecord,
};
pub use imaging::similarity;
pub use interval_merger::{merge, GapMerge, MergePolicy, MergeStrategy, PairMerge, PeakFate};
pub use peak_detector::{detect, PeakDetector};
pub use signal::{sample_signal, RegionScorer, SignalDump, TemplateScorer};
pub use stitch::{long_dir, slide_images, stitch_slides, DEFAULT_STITCH_GROUP_SIZE};
pub use timeline::{
    assemble, concat, format_timestamp, parse_srt, parse_timestamp, read_srt, render_srt, shift,
    write_srt, SubtitleEntry,
};
pub use video_stream::{FrameSource, VideoStream};

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{instrument, info, debug, warn};

/// Everything derived from the similarity signal before slides are captured
#[derive(Debug, Clone, PartialEq)]
pub struct SignalAnalysis {
    pub fps: f64,
    pub samples: Vec<Sample>,
    pub max_score: f64,
    pub peak_threshold: f64,
    pub low_peak_ratio: bool,
    pub peaks: Vec<Peak>,
    /// Name of the merge strategy that produced `intervals`
    pub merge_strategy: &'static str,
    pub intervals: Vec<Interval>,
}

impl SignalAnalysis {
    pub fn dump(&self) -> SignalDump<'_> {
        SignalDump {
            fps: self.fps,
            max_score: Some(self.max_score),
            peak_threshold: Some(self.peak_threshold),
            samples: &self.samples,
        }
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub analysis: SignalAnalysis,
    /// `None` when slide capture was disabled or no store was given
    pub capture: Option<CaptureOutcome>,
    pub entries: Vec<SubtitleEntry>,
}

impl PipelineRun {
    /// Intervals the timeline was built from
    pub fn final_intervals(&self) -> &[Interval] {
        self.capture
            .as_ref()
            .map_or(&self.analysis.intervals, |c| &c.intervals)
    }
}

/// Sample the whole signal, detect peaks and merge them into intervals
///
/// # Errors
/// * `InvalidConfiguration` - bad peak ratio or merge parameters
/// * `EmptySignal` - the source produced no frames
/// * `FrameProcessingFailed` - a frame could not be scored
#[instrument(skip_all, fields(peak_ratio = config.peak_ratio))]
pub fn analyze_signal<S, R>(source: &mut S, scorer: &mut R, config: &PipelineConfig) -> Result<SignalAnalysis>
where
    S: FrameSource + ?Sized,
    R: RegionScorer + ?Sized,
{
    let mut detector = PeakDetector::new(config.peak_ratio)?;
    config.merge_policy.validate()?;
    let strategy = config.merge_policy.build();

    let samples = sample_signal(source, scorer)?;
    let peaks = detector.detect(&samples)?;
    let intervals = merge(&peaks, source.fps(), strategy.as_ref())?;

    // detect() succeeded, so both are set
    let max_score = detector.max_score().unwrap_or_default();
    let peak_threshold = detector.threshold().unwrap_or_default();

    info!("{} peaks merged into {} intervals using {}",
          peaks.len(), intervals.len(), strategy.name());

    Ok(SignalAnalysis {
        fps: source.fps(),
        samples,
        max_score,
        peak_threshold,
        low_peak_ratio: detector.is_low_ratio(),
        peaks,
        merge_strategy: strategy.name(),
        intervals,
    })
}

/// Reject frame geometry the configured regions cannot work with
///
/// # Errors
/// * `UnsupportedGeometry` - aspect ratio mismatch or an empty crop region
pub fn check_geometry(config: &PipelineConfig, width: i32, height: i32) -> Result<()> {
    if width <= 0 || height <= 0 {
        return Err(SlidesubError::geometry_error(format!("frame size {}x{}", width, height)));
    }

    if let Some(aspect) = &config.aspect_ratio {
        aspect.check(width as u32, height as u32)?;
    }

    config.signal_region.to_rect(width, height)?;
    if config.slides_enabled {
        config.slide_region.to_rect(width, height)?;
    }
    Ok(())
}

/// Run every stage over an already opened source
///
/// Validation happens before anything is sampled. `slides` is prepared
/// right before the capture stage; pass `None` to build the timeline
/// straight from the merged intervals.
#[instrument(skip_all)]
pub fn run_pipeline<S, R>(
    source: &mut S,
    scorer: &mut R,
    slides: Option<&mut dyn SlideStore>,
    config: &PipelineConfig,
) -> Result<PipelineRun>
where
    S: FrameSource + ?Sized,
    R: RegionScorer + ?Sized,
{
    config.validate()?;
    let (width, height) = source.frame_size();
    check_geometry(config, width, height)?;

    let analysis = analyze_signal(source, scorer, config)?;

    let capture = match slides {
        Some(store) if config.slides_enabled => {
            store.prepare()?;
            let mut deduplicator = SlideDeduplicator::new(config.capture_options());
            Some(deduplicator.capture_and_dedupe(&analysis.intervals, source, store)?)
        }
        _ => None,
    };

    let mut run = PipelineRun {
        analysis,
        capture,
        entries: Vec::new(),
    };
    run.entries = assemble(run.final_intervals(), config.end_delay_seconds);

    if run.entries.is_empty() {
        warn!("No dialogue detected; the timeline is empty");
    }
    Ok(run)
}

/// Files written next to a processed video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputPaths {
    pub srt: PathBuf,
    pub slides_dir: PathBuf,
    pub signal_dump: PathBuf,
}

/// `<dir>/<stem>.srt`, `<dir>/<stem>-slides/` and `<dir>/<stem>-signal.json`
pub fn output_paths(video_path: &Path) -> Result<OutputPaths> {
    let stem = video_path
        .file_stem()
        .ok_or_else(|| SlidesubError::config_error(format!(
            "cannot derive output names from {}", video_path.display()
        )))?
        .to_string_lossy();
    let dir = video_path.parent().unwrap_or_else(|| Path::new(""));

    Ok(OutputPaths {
        srt: dir.join(format!("{}.srt", stem)),
        slides_dir: dir.join(format!("{}-slides", stem)),
        signal_dump: dir.join(format!("{}-signal.json", stem)),
    })
}

/// Summary of [`process_video`]
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub video: VideoInfo,
    pub srt_path: PathBuf,
    pub slides_dir: Option<PathBuf>,
    pub signal_path: Option<PathBuf>,
    pub frames_sampled: usize,
    pub max_score: f64,
    pub peak_threshold: f64,
    pub low_peak_ratio: bool,
    pub peaks: usize,
    pub merge_strategy: &'static str,
    pub candidate_intervals: usize,
    pub slides_merged: usize,
    pub intervals_dropped: usize,
    pub entries: Vec<SubtitleEntry>,
}

/// Process one video file end to end
///
/// Writes the subtitle file, the slide directory (unless disabled) and
/// optionally the raw signal, all next to the video.
///
/// # Errors
/// * `InvalidConfiguration` / `UnsupportedGeometry` / `ReferenceImage` -
///   reported before any output is written
/// * `VideoNotFound` / `VideoOpenFailed` / `InvalidVideoFormat`
/// * `EmptySignal` - the video decoded no frames
/// * `Io` - an output could not be written
#[instrument(skip(config))]
pub fn process_video(video_path: &Path, config: &PipelineConfig) -> Result<ProcessReport> {
    info!("Processing {}", video_path.display());

    config.validate()?;
    let outputs = output_paths(video_path)?;

    let mut stream = VideoStream::open(video_path)?;
    let video = VideoInfo::from_stream(&stream);
    check_geometry(config, stream.width(), stream.height())?;

    let mut scorer = TemplateScorer::from_file(config.signal_region, &config.reference_image)?;

    let mut slides = SlideDirectory::new(&outputs.slides_dir);
    let store: Option<&mut dyn SlideStore> = if config.slides_enabled {
        Some(&mut slides)
    } else {
        None
    };

    let run = run_pipeline(&mut stream, &mut scorer, store, config)?;
    write_srt(&outputs.srt, &run.entries)?;

    let signal_path = if config.dump_signal {
        run.analysis.dump().write(&outputs.signal_dump)?;
        Some(outputs.signal_dump.clone())
    } else {
        None
    };

    let (slides_merged, intervals_dropped) = run
        .capture
        .as_ref()
        .map_or((0, 0), |c| (c.merged, c.dropped));

    debug!("Finished {}: {} entries", video_path.display(), run.entries.len());

    Ok(ProcessReport {
        video,
        srt_path: outputs.srt,
        slides_dir: run.capture.is_some().then_some(outputs.slides_dir),
        signal_path,
        frames_sampled: run.analysis.samples.len(),
        max_score: run.analysis.max_score,
        peak_threshold: run.analysis.peak_threshold,
        low_peak_ratio: run.analysis.low_peak_ratio,
        peaks: run.analysis.peaks.len(),
        merge_strategy: run.analysis.merge_strategy,
        candidate_intervals: run.analysis.intervals.len(),
        slides_merged,
        intervals_dropped,
        entries: run.entries,
    })
}

/// Get video information without running the pipeline
#[instrument]
pub fn get_video_info(video_path: &Path) -> Result<VideoInfo> {
    let video_stream = VideoStream::open(video_path)?;
    Ok(VideoInfo::from_stream(&video_stream))
}

/// Video metadata information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub path: String,
    pub fps: f64,
    pub frame_count: u32,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

impl VideoInfo {
    fn from_stream(stream: &VideoStream) -> Self {
        Self {
            path: stream.path().to_string(),
            fps: stream.fps(),
            frame_count: stream.frame_count(),
            width: stream.width().max(0) as u32,
            height: stream.height().max(0) as u32,
            duration_seconds: stream.duration_seconds(),
        }
    }

    /// Get a human-readable description of the video
    pub fn description(&self) -> String {
        format!(
            "{}x{} at {:.2}fps, {} frames ({:.1}s duration)",
            self.width, self.height, self.fps, self.frame_count, self.duration_seconds
        )
    }

    /// Check if this appears to be a valid video configuration
    pub fn is_valid(&self) -> bool {
        self.fps > 0.0
            && self.frame_count > 0
            && self.width > 0
            && self.height > 0
            && self.duration_seconds > 0.0
    }

    /// Whether the default 9:16 portrait layout applies
    pub fn is_portrait_9_16(&self) -> bool {
        AspectRatio::portrait_9_16().matches(self.width, self.height)
    }
}

/// Initialize tracing for the library
///
/// Call this once at the start of your application. `RUST_LOG` takes
/// precedence over `level`.
///
/// # Arguments
/// * `level` - Tracing level filter (e.g., "debug", "info", "warn", "error")
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Slidesub initialized with tracing level: {}", level);
}
