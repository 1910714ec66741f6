//! Slide capture and near-duplicate folding
//!
//! For every candidate interval one frame is decoded a few frames past the
//! interval start, the slide region is cropped out and persisted. When a
//! capture is practically identical to the previous canonical slide, the two
//! intervals describe the same dialogue box: the capture is stored as a
//! variant of that slide and the earlier interval absorbs the later one.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use opencv::{core::Mat, imgcodecs, prelude::*};
use tracing::{instrument, debug, info, warn};

use crate::common::{FrameTimecode, Interval, Result, SlidesubError};
use crate::config::{RegionRatios, DEFAULT_CAPTURE_FRAME_OFFSET, DEFAULT_DEDUPE_THRESHOLD};
use crate::imaging;
use crate::video_stream::FrameSource;

/// Capture and comparison settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    pub slide_region: RegionRatios,
    pub dedupe_enabled: bool,
    /// Similarity at or above which a capture counts as a duplicate
    pub dedupe_threshold: f64,
    /// Frames skipped past the interval start, clear of transition frames
    pub frame_offset: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            slide_region: RegionRatios::default_slide(),
            dedupe_enabled: true,
            dedupe_threshold: DEFAULT_DEDUPE_THRESHOLD,
            frame_offset: DEFAULT_CAPTURE_FRAME_OFFSET,
        }
    }
}

/// Destination for captured slides
pub trait SlideStore {
    /// Persist the canonical slide for `sequence`
    fn save_canonical(&mut self, sequence: u32, slide: &Mat) -> Result<()>;

    /// Persist the `variant`-th merged variant of `sequence`
    fn save_variant(&mut self, sequence: u32, variant: u32, slide: &Mat) -> Result<()>;

    /// Flag the canonical slide of `sequence` as having variants.
    /// Called at most once per sequence.
    fn mark_has_variants(&mut self, sequence: u32) -> Result<()>;

    /// Called once before the first slide of a run is saved
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Slides stored as PNG files in one directory
///
/// * canonical: `0001.png`
/// * canonical once it has variants: `0001-merged.png`
/// * variants: `0001-v0.png`, `0001-v1.png`, ...
#[derive(Debug, Clone)]
pub struct SlideDirectory {
    root: PathBuf,
}

impl SlideDirectory {
    /// Nothing touches the filesystem until [`SlideStore::prepare`]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory at `root`, emptied of anything a previous run left there
    pub fn create_fresh(root: &Path) -> Result<Self> {
        let mut slides = Self::new(root);
        slides.prepare()?;
        Ok(slides)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn canonical_path(&self, sequence: u32) -> PathBuf {
        self.root.join(format!("{:04}.png", sequence))
    }

    pub fn merged_path(&self, sequence: u32) -> PathBuf {
        self.root.join(format!("{:04}-merged.png", sequence))
    }

    pub fn variant_path(&self, sequence: u32, variant: u32) -> PathBuf {
        self.root.join(format!("{:04}-v{}.png", sequence, variant))
    }

    pub(crate) fn write_image(path: &Path, image: &Mat) -> Result<()> {
        let path_str = path.to_string_lossy();
        if !imgcodecs::imwrite_def(&path_str, image)? {
            return Err(SlidesubError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("could not encode {}", path_str),
            )));
        }
        Ok(())
    }
}

impl SlideStore for SlideDirectory {
    fn save_canonical(&mut self, sequence: u32, slide: &Mat) -> Result<()> {
        Self::write_image(&self.canonical_path(sequence), slide)
    }

    fn save_variant(&mut self, sequence: u32, variant: u32, slide: &Mat) -> Result<()> {
        Self::write_image(&self.variant_path(sequence, variant), slide)
    }

    fn mark_has_variants(&mut self, sequence: u32) -> Result<()> {
        fs::rename(self.canonical_path(sequence), self.merged_path(sequence))?;
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    fn prepare(&mut self) -> Result<()> {
        if self.root.exists() {
            debug!("Clearing slide directory {}", self.root.display());
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

/// Variant bookkeeping for one canonical slide
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VariantRecord {
    pub has_variant: bool,
    pub variant_count: u32,
}

/// Carried from one interval to the next
#[derive(Debug)]
struct DedupState {
    /// Grayscale crop of the most recent canonical slide
    previous: Option<Mat>,
    next_sequence: u32,
    records: BTreeMap<u32, VariantRecord>,
}

impl Default for DedupState {
    fn default() -> Self {
        Self {
            previous: None,
            next_sequence: 1,
            records: BTreeMap::new(),
        }
    }
}

/// Result of one capture pass
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    /// Surviving intervals, one per canonical slide
    pub intervals: Vec<Interval>,
    /// Intervals lost to a failed seek or decode
    pub dropped: usize,
    /// Intervals folded into their predecessor
    pub merged: usize,
}

/// Captures slides and folds near-duplicates
///
/// All state lives in the value itself, so independent runs use independent
/// deduplicators.
#[derive(Debug)]
pub struct SlideDeduplicator {
    options: CaptureOptions,
    state: DedupState,
}

impl SlideDeduplicator {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            options,
            state: DedupState::default(),
        }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Bookkeeping for `sequence`, if it ever received a variant
    pub fn variant_record(&self, sequence: u32) -> Option<VariantRecord> {
        self.state.records.get(&sequence).copied()
    }

    /// Number of canonical slides written so far
    pub fn canonical_count(&self) -> u32 {
        self.state.next_sequence - 1
    }

    pub fn reset(&mut self) {
        debug!("Resetting SlideDeduplicator state");
        self.state = DedupState::default();
    }

    /// Frame captured for `interval`
    pub fn capture_frame_index(&self, interval: &Interval, fps: f64) -> u32 {
        FrameTimecode::from_seconds(interval.start_time, fps)
            .frame_number()
            .saturating_add(self.options.frame_offset)
    }

    /// Capture one slide per interval and fold duplicates
    ///
    /// Each call is a fresh run: numbering restarts at 1 and nothing from
    /// an earlier call is compared against. Failed captures or comparisons
    /// drop their interval and are counted; only slide store failures abort.
    #[instrument(skip_all, fields(intervals = intervals.len()))]
    pub fn capture_and_dedupe<S, T>(
        &mut self,
        intervals: &[Interval],
        source: &mut S,
        store: &mut T,
    ) -> Result<CaptureOutcome>
    where
        S: FrameSource + ?Sized,
        T: SlideStore + ?Sized,
    {
        if self.state.next_sequence > 1 {
            self.reset();
        }

        let fps = source.fps();
        let mut output: Vec<Interval> = Vec::with_capacity(intervals.len());
        let mut dropped = 0;
        let mut merged = 0;

        for interval in intervals {
            let frame_index = self.capture_frame_index(interval, fps);

            let slide = match self.capture(source, frame_index) {
                Ok(slide) => slide,
                Err(e) => {
                    warn!("Dropping interval {:.3}s-{:.3}s: capture at frame {} failed: {}",
                          interval.start_time, interval.end_time, frame_index, e);
                    dropped += 1;
                    continue;
                }
            };

            let gray = match imaging::to_gray(&slide) {
                Ok(gray) => gray,
                Err(e) => {
                    warn!("Dropping interval {:.3}s-{:.3}s: grayscale conversion failed: {}",
                          interval.start_time, interval.end_time, e);
                    dropped += 1;
                    continue;
                }
            };

            let similarity = match (&self.state.previous, self.options.dedupe_enabled) {
                (Some(previous), true) => match imaging::similarity(previous, &gray) {
                    Ok(similarity) => Some(similarity),
                    Err(e) => {
                        warn!("Dropping interval {:.3}s-{:.3}s: comparison with slide {:04} failed: {}",
                              interval.start_time, interval.end_time, self.state.next_sequence - 1, e);
                        dropped += 1;
                        continue;
                    }
                },
                _ => None,
            };

            if let Some(similarity) = similarity.filter(|s| *s >= self.options.dedupe_threshold) {
                let sequence = self.state.next_sequence - 1;
                let record = self.state.records.entry(sequence).or_default();

                if !record.has_variant {
                    store.mark_has_variants(sequence)?;
                    record.has_variant = true;
                }
                store.save_variant(sequence, record.variant_count, &slide)?;
                record.variant_count += 1;

                if let Some(last) = output.last_mut() {
                    last.extend_to(interval.end_time);
                }
                merged += 1;

                debug!("Interval {:.3}s-{:.3}s duplicates slide {:04} (similarity {:.5})",
                       interval.start_time, interval.end_time, sequence, similarity);
                continue;
            }

            let sequence = self.state.next_sequence;
            store.save_canonical(sequence, &slide)?;
            self.state.previous = Some(gray);
            self.state.next_sequence += 1;
            output.push(*interval);

            debug!("Slide {:04} captured at frame {}", sequence, frame_index);
        }

        info!("Captured {} slides ({} merged, {} dropped) from {} intervals",
              output.len(), merged, dropped, intervals.len());

        Ok(CaptureOutcome {
            intervals: output,
            dropped,
            merged,
        })
    }

    fn capture<S: FrameSource + ?Sized>(&self, source: &mut S, frame_index: u32) -> Result<Mat> {
        let frame = source
            .read_frame_at(frame_index)?
            .ok_or_else(|| SlidesubError::frame_error(frame_index, "no frame at this position"))?;
        imaging::crop_region(&frame, &self.options.slide_region)
    }
}

/// One-shot capture with a fresh deduplicator
pub fn capture_and_dedupe<S, T>(
    intervals: &[Interval],
    source: &mut S,
    store: &mut T,
    options: CaptureOptions,
) -> Result<CaptureOutcome>
where
    S: FrameSource + ?Sized,
    T: SlideStore + ?Sized,
{
    SlideDeduplicator::new(options).capture_and_dedupe(intervals, source, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::tests::{gray_image, gray_image_with_flips};
    use std::collections::{BTreeMap, BTreeSet};

    /// Frame source serving frames only at scripted positions
    struct ScriptedSource {
        fps: f64,
        frames: BTreeMap<u32, Mat>,
        broken: BTreeSet<u32>,
        position: u32,
    }

    impl ScriptedSource {
        fn new(fps: f64) -> Self {
            Self { fps, frames: BTreeMap::new(), broken: BTreeSet::new(), position: 0 }
        }

        fn with_frame(mut self, index: u32, frame: Mat) -> Self {
            self.frames.insert(index, frame);
            self
        }

        fn with_broken(mut self, index: u32) -> Self {
            self.broken.insert(index);
            self
        }
    }

    impl FrameSource for ScriptedSource {
        fn fps(&self) -> f64 {
            self.fps
        }

        fn frame_size(&self) -> (i32, i32) {
            (100, 100)
        }

        fn frame_count(&self) -> u32 {
            self.frames.keys().next_back().map_or(0, |k| k + 1)
        }

        fn read_frame(&mut self) -> Result<Option<Mat>> {
            let frame = self.frames.get(&self.position).map(|m| m.try_clone()).transpose()?;
            self.position += 1;
            Ok(frame)
        }

        fn seek(&mut self, frame_index: u32) -> Result<()> {
            if self.broken.contains(&frame_index) {
                return Err(SlidesubError::frame_error(frame_index, "scripted seek failure"));
            }
            self.position = frame_index;
            Ok(())
        }
    }

    #[derive(Debug, PartialEq)]
    enum StoreEvent {
        Canonical(u32),
        Variant(u32, u32),
        Marked(u32),
    }

    #[derive(Default)]
    struct RecordingStore {
        events: Vec<StoreEvent>,
    }

    impl SlideStore for RecordingStore {
        fn save_canonical(&mut self, sequence: u32, _slide: &Mat) -> Result<()> {
            self.events.push(StoreEvent::Canonical(sequence));
            Ok(())
        }

        fn save_variant(&mut self, sequence: u32, variant: u32, _slide: &Mat) -> Result<()> {
            self.events.push(StoreEvent::Variant(sequence, variant));
            Ok(())
        }

        fn mark_has_variants(&mut self, sequence: u32) -> Result<()> {
            self.events.push(StoreEvent::Marked(sequence));
            Ok(())
        }
    }

    fn whole_frame_options() -> CaptureOptions {
        CaptureOptions {
            slide_region: RegionRatios::new(0.0, 0.0, 1.0, 1.0),
            ..CaptureOptions::default()
        }
    }

    fn iv(start: f64, end: f64) -> Interval {
        Interval::new(start, end)
    }

    #[test]
    fn test_capture_frame_index_adds_offset() {
        let dedup = SlideDeduplicator::new(CaptureOptions::default());
        assert_eq!(dedup.capture_frame_index(&iv(1.0, 2.0), 10.0), 12);
        assert_eq!(dedup.capture_frame_index(&iv(10.0 / 30.0, 1.0), 30.0), 12);
    }

    #[test]
    fn test_near_duplicate_folds_into_previous() {
        // Similarity 0.998 >= 0.996
        let mut source = ScriptedSource::new(10.0)
            .with_frame(12, gray_image(100, 100, 0))
            .with_frame(32, gray_image_with_flips(100, 100, 20));
        let mut store = RecordingStore::default();
        let mut dedup = SlideDeduplicator::new(whole_frame_options());

        let outcome = dedup
            .capture_and_dedupe(&[iv(1.0, 2.0), iv(3.0, 4.0)], &mut source, &mut store)
            .unwrap();

        assert_eq!(outcome.intervals, vec![iv(1.0, 4.0)]);
        assert_eq!(outcome.merged, 1);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(store.events, vec![
            StoreEvent::Canonical(1),
            StoreEvent::Marked(1),
            StoreEvent::Variant(1, 0),
        ]);
        assert_eq!(dedup.variant_record(1), Some(VariantRecord { has_variant: true, variant_count: 1 }));
    }

    #[test]
    fn test_canonical_marked_once_for_many_variants() {
        let mut source = ScriptedSource::new(10.0)
            .with_frame(12, gray_image(100, 100, 0))
            .with_frame(32, gray_image(100, 100, 0))
            .with_frame(52, gray_image(100, 100, 0));
        let mut store = RecordingStore::default();

        let outcome = capture_and_dedupe(
            &[iv(1.0, 2.0), iv(3.0, 4.0), iv(5.0, 6.0)],
            &mut source, &mut store, whole_frame_options(),
        ).unwrap();

        assert_eq!(outcome.intervals, vec![iv(1.0, 6.0)]);
        assert_eq!(store.events, vec![
            StoreEvent::Canonical(1),
            StoreEvent::Marked(1),
            StoreEvent::Variant(1, 0),
            StoreEvent::Variant(1, 1),
        ]);
    }

    #[test]
    fn test_distinct_slides_get_sequential_indices() {
        let mut source = ScriptedSource::new(10.0)
            .with_frame(12, gray_image(100, 100, 0))
            .with_frame(32, gray_image(100, 100, 255))
            .with_frame(52, gray_image(100, 100, 255))
            .with_frame(72, gray_image(100, 100, 0));
        let mut store = RecordingStore::default();
        let mut dedup = SlideDeduplicator::new(whole_frame_options());

        let intervals = [iv(1.0, 2.0), iv(3.0, 4.0), iv(5.0, 6.0), iv(7.0, 8.0)];
        let outcome = dedup.capture_and_dedupe(&intervals, &mut source, &mut store).unwrap();

        // Third duplicates second; fourth matches the first but only the
        // immediately preceding canonical slide is compared.
        assert_eq!(outcome.intervals, vec![iv(1.0, 2.0), iv(3.0, 6.0), iv(7.0, 8.0)]);
        assert_eq!(dedup.canonical_count(), 3);
        assert_eq!(store.events, vec![
            StoreEvent::Canonical(1),
            StoreEvent::Canonical(2),
            StoreEvent::Marked(2),
            StoreEvent::Variant(2, 0),
            StoreEvent::Canonical(3),
        ]);
    }

    #[test]
    fn test_below_threshold_is_distinct() {
        // 100 of 10_000 pixels flipped: similarity 0.99
        let mut source = ScriptedSource::new(10.0)
            .with_frame(12, gray_image(100, 100, 0))
            .with_frame(32, gray_image_with_flips(100, 100, 100));
        let mut store = RecordingStore::default();

        let outcome = capture_and_dedupe(
            &[iv(1.0, 2.0), iv(3.0, 4.0)], &mut source, &mut store, whole_frame_options(),
        ).unwrap();

        assert_eq!(outcome.intervals.len(), 2);
        assert_eq!(outcome.merged, 0);
    }

    #[test]
    fn test_dedupe_disabled_keeps_everything() {
        let mut source = ScriptedSource::new(10.0)
            .with_frame(12, gray_image(100, 100, 0))
            .with_frame(32, gray_image(100, 100, 0));
        let mut store = RecordingStore::default();
        let options = CaptureOptions { dedupe_enabled: false, ..whole_frame_options() };

        let outcome = capture_and_dedupe(
            &[iv(1.0, 2.0), iv(3.0, 4.0)], &mut source, &mut store, options,
        ).unwrap();

        assert_eq!(outcome.intervals, vec![iv(1.0, 2.0), iv(3.0, 4.0)]);
        assert_eq!(store.events, vec![StoreEvent::Canonical(1), StoreEvent::Canonical(2)]);
    }

    #[test]
    fn test_failed_capture_drops_interval_and_continues() {
        // Frame 32 is missing, frame 52 fails to seek
        let mut source = ScriptedSource::new(10.0)
            .with_frame(12, gray_image(100, 100, 0))
            .with_broken(52)
            .with_frame(72, gray_image(100, 100, 255));
        let mut store = RecordingStore::default();

        let outcome = capture_and_dedupe(
            &[iv(1.0, 2.0), iv(3.0, 4.0), iv(5.0, 6.0), iv(7.0, 8.0)],
            &mut source, &mut store, whole_frame_options(),
        ).unwrap();

        assert_eq!(outcome.intervals, vec![iv(1.0, 2.0), iv(7.0, 8.0)]);
        assert_eq!(outcome.dropped, 2);
        assert_eq!(store.events, vec![StoreEvent::Canonical(1), StoreEvent::Canonical(2)]);
    }

    #[test]
    fn test_first_capture_failure_leaves_no_previous() {
        let mut source = ScriptedSource::new(10.0)
            .with_frame(32, gray_image(100, 100, 0));
        let mut store = RecordingStore::default();

        let outcome = capture_and_dedupe(
            &[iv(1.0, 2.0), iv(3.0, 4.0)], &mut source, &mut store, whole_frame_options(),
        ).unwrap();

        assert_eq!(outcome.intervals, vec![iv(3.0, 4.0)]);
        assert_eq!(store.events, vec![StoreEvent::Canonical(1)]);
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let mut dedup = SlideDeduplicator::new(whole_frame_options());
        let mut store = RecordingStore::default();
        let mut source = ScriptedSource::new(10.0).with_frame(12, gray_image(100, 100, 0));

        dedup.capture_and_dedupe(&[iv(1.0, 2.0)], &mut source, &mut store).unwrap();
        assert_eq!(dedup.canonical_count(), 1);

        dedup.reset();
        assert_eq!(dedup.canonical_count(), 0);
        assert!(dedup.variant_record(1).is_none());
    }

    #[test]
    fn test_second_run_starts_fresh() {
        let mut dedup = SlideDeduplicator::new(whole_frame_options());
        let mut source = ScriptedSource::new(10.0)
            .with_frame(12, gray_image(100, 100, 0))
            .with_frame(32, gray_image(100, 100, 0));

        let mut first = RecordingStore::default();
        let outcome = dedup.capture_and_dedupe(&[iv(1.0, 2.0)], &mut source, &mut first).unwrap();
        assert_eq!(outcome.intervals, vec![iv(1.0, 2.0)]);

        // Same picture as the last slide of the previous run
        let mut second = RecordingStore::default();
        let outcome = dedup.capture_and_dedupe(&[iv(3.0, 4.0)], &mut source, &mut second).unwrap();

        assert_eq!(outcome.intervals, vec![iv(3.0, 4.0)]);
        assert_eq!(outcome.merged, 0);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(second.events, vec![StoreEvent::Canonical(1)]);
        assert_eq!(dedup.canonical_count(), 1);
        assert!(dedup.variant_record(1).is_none());
    }

    #[test]
    fn test_failed_comparison_drops_interval_and_continues() {
        // 16-bit crop cannot be diffed against the 8-bit previous slide
        let deep = Mat::new_rows_cols_with_default(100, 100, opencv::core::CV_16UC1, opencv::core::Scalar::all(0.0))
            .unwrap();
        let mut source = ScriptedSource::new(10.0)
            .with_frame(12, gray_image(100, 100, 0))
            .with_frame(32, deep)
            .with_frame(52, gray_image(100, 100, 255));
        let mut store = RecordingStore::default();

        let outcome = capture_and_dedupe(
            &[iv(1.0, 2.0), iv(3.0, 4.0), iv(5.0, 6.0)],
            &mut source, &mut store, whole_frame_options(),
        ).unwrap();

        assert_eq!(outcome.intervals, vec![iv(1.0, 2.0), iv(5.0, 6.0)]);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.merged, 0);
        assert_eq!(store.events, vec![StoreEvent::Canonical(1), StoreEvent::Canonical(2)]);
    }

    #[test]
    fn test_slide_directory_naming_and_rename() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("video-slides");
        let mut slides = SlideDirectory::create_fresh(&root).unwrap();

        let image = gray_image(8, 8, 128);
        slides.save_canonical(1, &image).unwrap();
        slides.mark_has_variants(1).unwrap();
        slides.save_variant(1, 0, &image).unwrap();
        slides.save_variant(1, 1, &image).unwrap();
        slides.save_canonical(2, &image).unwrap();

        assert!(!root.join("0001.png").exists());
        assert!(root.join("0001-merged.png").exists());
        assert!(root.join("0001-v0.png").exists());
        assert!(root.join("0001-v1.png").exists());
        assert!(root.join("0002.png").exists());
    }

    #[test]
    fn test_slide_directory_clears_previous_run() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("slides");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("stale.png"), b"old").unwrap();

        let slides = SlideDirectory::create_fresh(&root).unwrap();
        assert_eq!(slides.root(), root.as_path());
        assert!(!root.join("stale.png").exists());
        assert!(root.is_dir());
    }

    #[test]
    fn test_slide_directory_new_is_lazy() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("later");
        let mut slides = SlideDirectory::new(&root);
        assert!(!root.exists());

        slides.prepare().unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_end_to_end_with_slide_directory() {
        let temp = tempfile::tempdir().unwrap();
        let mut slides = SlideDirectory::create_fresh(&temp.path().join("s")).unwrap();
        let mut source = ScriptedSource::new(10.0)
            .with_frame(12, gray_image(50, 50, 10))
            .with_frame(32, gray_image(50, 50, 10));

        let outcome = capture_and_dedupe(
            &[iv(1.0, 2.0), iv(3.0, 4.0)], &mut source, &mut slides, whole_frame_options(),
        ).unwrap();

        assert_eq!(outcome.intervals, vec![iv(1.0, 4.0)]);
        assert!(slides.merged_path(1).exists());
        assert!(slides.variant_path(1, 0).exists());
        assert!(!slides.canonical_path(1).exists());
    }
}
