//! Command-line interface for the slidesub library
//!
//! `process` runs the full pipeline on one or more videos, `info` prints
//! stream metadata, `concat` joins the subtitle files of consecutive clips
//! into one timeline and `stitch` stacks saved slides into long images.

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, error, info, warn};

use rust_slidesub::{
    concat, format_timestamp, get_video_info, init_tracing, process_video, read_srt, stitch_slides,
    write_srt, MergePolicy, PipelineConfig, ProcessReport, VideoInfo, DEFAULT_STITCH_GROUP_SIZE,
};

#[derive(Parser, Debug)]
#[command(name = "rust-slidesub")]
#[command(author, version, about = "Dialogue timing and slide extraction for vertical videos", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build subtitle timelines and slide snapshots
    Process(ProcessArgs),

    /// Show video information only
    Info {
        video: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Simple)]
        format: OutputFormat,
    },

    /// Join SRT files of consecutive clips, shifting and renumbering
    Concat(ConcatArgs),

    /// Stack a slide directory into long images, written to `<SLIDES>-long/`
    Stitch {
        slides: PathBuf,

        /// Slides per long image
        #[arg(long, short = 'n', default_value_t = DEFAULT_STITCH_GROUP_SIZE,
              value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize))]
        group_size: usize,
    },
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Videos to process, one after another
    #[arg(required = true)]
    videos: Vec<PathBuf>,

    /// JSON configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fraction of the maximum score counted as "on"
    #[arg(long)]
    peak_ratio: Option<f64>,

    #[arg(long, value_enum)]
    merge: Option<MergeKind>,

    /// Gap in seconds for the selected merge strategy
    #[arg(long)]
    merge_gap: Option<f64>,

    /// Seconds added to every subtitle end
    #[arg(long)]
    end_delay: Option<f64>,

    /// Skip slide capture
    #[arg(long)]
    no_slides: bool,

    /// Keep near-duplicate slides as separate subtitles
    #[arg(long)]
    no_dedupe: bool,

    #[arg(long)]
    dedupe_threshold: Option<f64>,

    /// Reference template image for the signal region
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Accept any frame aspect ratio
    #[arg(long)]
    no_aspect_check: bool,

    /// Write the raw similarity signal next to the video
    #[arg(long)]
    dump_signal: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Simple)]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct ConcatArgs {
    /// Subtitle files in playback order
    #[arg(long = "srt", required = true, num_args = 1..)]
    srt: Vec<PathBuf>,

    /// Duration in seconds of each part
    #[arg(long = "duration", num_args = 1.., conflicts_with = "videos",
          required_unless_present = "videos")]
    durations: Vec<f64>,

    /// Read part durations from these videos instead
    #[arg(long = "video", num_args = 1..)]
    videos: Vec<PathBuf>,

    #[arg(long, short = 'o')]
    output: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MergeKind {
    Gap,
    Pair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Simple,     // One line per video
    Detailed,   // Every subtitle with timings
    Json,       // For integration
}

impl ProcessArgs {
    /// File (or default) configuration with command-line overrides applied
    fn build_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate().context("Invalid command-line overrides")?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(ratio) = self.peak_ratio {
            config.peak_ratio = ratio;
        }

        match (self.merge, config.merge_policy) {
            (Some(MergeKind::Gap), MergePolicy::Pair { .. }) => config.merge_policy = MergePolicy::default(),
            (Some(MergeKind::Pair), MergePolicy::Gap { .. }) => config.merge_policy = MergePolicy::default_pair(),
            _ => {}
        }

        if let Some(gap) = self.merge_gap {
            match &mut config.merge_policy {
                MergePolicy::Gap { gap_seconds } => *gap_seconds = gap,
                MergePolicy::Pair { pair_gap_seconds, .. } => *pair_gap_seconds = gap,
            }
        }

        if let Some(delay) = self.end_delay {
            config.end_delay_seconds = delay;
        }
        if self.no_slides {
            config.slides_enabled = false;
        }
        if self.no_dedupe {
            config.dedupe_enabled = false;
        }
        if let Some(threshold) = self.dedupe_threshold {
            config.dedupe_threshold = threshold;
        }
        if let Some(reference) = &self.reference {
            config.reference_image = reference.clone();
        }
        if self.no_aspect_check {
            config.aspect_ratio = None;
        }
        if self.dump_signal {
            config.dump_signal = true;
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    init_tracing(log_level);

    info!("Slidesub CLI v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", cli);

    match cli.command {
        Command::Process(args) => run_process(&args),
        Command::Info { video, format } => {
            let video_info = get_video_info(&video)
                .with_context(|| format!("Failed to get video info for {}", video.display()))?;
            show_video_info(&video_info, format)
        }
        Command::Concat(args) => run_concat(&args),
        Command::Stitch { slides, group_size } => {
            let sheets = stitch_slides(&slides, group_size)
                .with_context(|| format!("Failed to stitch {}", slides.display()))?;
            for sheet in &sheets {
                println!("{}", sheet.display());
            }
            Ok(())
        }
    }
}

fn run_process(args: &ProcessArgs) -> Result<()> {
    let config = args.build_config()?;
    debug!("Configuration: {:?}", config);

    let mut failures = 0;
    for video in &args.videos {
        let start_time = Instant::now();
        match process_video(video, &config) {
            Ok(report) => output_report(&report, args.format, start_time.elapsed())?,
            Err(e) => {
                error!("Failed to process {}: {}", video.display(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} videos failed", failures, args.videos.len());
    }
    Ok(())
}

fn run_concat(args: &ConcatArgs) -> Result<()> {
    let durations = if args.videos.is_empty() {
        args.durations.clone()
    } else {
        args.videos
            .iter()
            .map(|video| {
                get_video_info(video)
                    .map(|v| v.duration_seconds)
                    .with_context(|| format!("Failed to read duration of {}", video.display()))
            })
            .collect::<Result<Vec<_>>>()?
    };

    let parts = args.srt
        .iter()
        .map(|path| read_srt(path).with_context(|| format!("Failed to read {}", path.display())))
        .collect::<Result<Vec<_>>>()?;

    let joined = concat(&parts, &durations).context("Cannot concatenate subtitle files")?;
    write_srt(&args.output, &joined)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!("Merged {} files ({} subtitles) into {}",
             parts.len(), joined.len(), args.output.display());
    Ok(())
}

fn show_video_info(video_info: &VideoInfo, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(video_info)
            .context("JSON serialization failed")?);
        return Ok(());
    }

    println!("Video Information:");
    println!("  Path: {}", video_info.path);
    println!("  Dimensions: {}x{}", video_info.width, video_info.height);
    println!("  Frame Rate: {:.2} fps", video_info.fps);
    println!("  Frame Count: {}", video_info.frame_count);
    println!("  Duration: {:.2} seconds", video_info.duration_seconds);
    println!("  Description: {}", video_info.description());

    if !video_info.is_valid() {
        warn!("Video properties appear invalid - processing may fail");
    }
    if !video_info.is_portrait_9_16() {
        warn!("Video is not 9:16; run with --no-aspect-check or a custom aspect_ratio");
    }

    Ok(())
}

fn output_report(report: &ProcessReport, format: OutputFormat, elapsed: Duration) -> Result<()> {
    match format {
        OutputFormat::Simple => {
            println!("{}: {} subtitles -> {}",
                     report.video.path, report.entries.len(), report.srt_path.display());
        }
        OutputFormat::Detailed => {
            println!("Results for {}:", report.video.path);
            println!("  Processing time: {}ms", elapsed.as_millis());
            println!("  Frames sampled: {}", report.frames_sampled);
            println!("  Peak threshold: {:.4} (max score {:.4})", report.peak_threshold, report.max_score);
            if report.low_peak_ratio {
                println!("  Warning: low peak ratio, expect false positives");
            }
            println!("  Peaks: {}, intervals after {}: {}",
                     report.peaks, report.merge_strategy, report.candidate_intervals);
            if let Some(dir) = &report.slides_dir {
                println!("  Slides: {} ({} merged, {} dropped)",
                         dir.display(), report.slides_merged, report.intervals_dropped);
            }
            if let Some(path) = &report.signal_path {
                println!("  Signal dump: {}", path.display());
            }
            println!("  Subtitles: {}", report.srt_path.display());

            if report.entries.is_empty() {
                println!("  No dialogue detected");
            }
            for entry in &report.entries {
                println!("    {} {} --> {}", entry.payload,
                         format_timestamp(entry.start_time), format_timestamp(entry.end_time));
            }
        }
        OutputFormat::Json => {
            let json_output = serde_json::json!({
                "processing_time_ms": elapsed.as_millis() as u64,
                "report": report,
            });
            println!("{}", serde_json::to_string_pretty(&json_output)
                .context("JSON serialization failed")?);
        }
    }

    info!("Finished {} in {}ms", report.video.path, elapsed.as_millis());
    Ok(())
}
