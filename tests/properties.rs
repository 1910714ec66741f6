//! Property-based tests for peak detection, merging and timeline assembly.

use proptest::prelude::*;
use rust_slidesub::{assemble, detect, merge, GapMerge, MergeStrategy, PairMerge, Peak, Sample};

fn samples_from(scores: &[f64]) -> Vec<Sample> {
    scores
        .iter()
        .enumerate()
        .map(|(i, &score)| Sample::new(i as u32, score))
        .collect()
}

/// Ordered, non-overlapping peaks from (gap, length) pairs in frames
fn peaks_from(layout: &[(u32, u32)]) -> Vec<Peak> {
    let mut next_free = 0;
    layout
        .iter()
        .map(|&(gap, len)| {
            let start = next_free + gap;
            let peak = Peak::new(start, start + len);
            next_free = start + len + 1;
            peak
        })
        .collect()
}

fn covered_frames(peaks: &[Peak]) -> u32 {
    peaks.iter().map(Peak::len_frames).sum()
}

fn peak_layout() -> impl Strategy<Value = Vec<(u32, u32)>> {
    prop::collection::vec((0u32..90, 0u32..30), 1..40)
}

// =============================================================================
// Peak detection
// =============================================================================

proptest! {
    /// A stricter ratio never covers more frames, and every run it finds
    /// lies inside a run found by the looser ratio.
    #[test]
    fn higher_ratio_never_widens_coverage(
        scores in prop::collection::vec(0.0f64..=1.0, 1..200),
        low in 0.05f64..=1.0,
        high in 0.05f64..=1.0,
    ) {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let samples = samples_from(&scores);

        let loose = detect(&samples, low).unwrap();
        let strict = detect(&samples, high).unwrap();

        prop_assert!(covered_frames(&strict) <= covered_frames(&loose));
        for peak in &strict {
            prop_assert!(loose.iter().any(|outer|
                outer.start_frame <= peak.start_frame && peak.end_frame <= outer.end_frame));
        }
    }

    /// Detected runs are ordered, disjoint and separated by at least one frame.
    #[test]
    fn peaks_are_ordered_and_disjoint(
        scores in prop::collection::vec(0.0f64..=1.0, 1..200),
        ratio in 0.05f64..=1.0,
    ) {
        let peaks = detect(&samples_from(&scores), ratio).unwrap();
        prop_assert!(!peaks.is_empty());
        for pair in peaks.windows(2) {
            prop_assert!(pair[0].end_frame + 1 < pair[1].start_frame);
        }
    }
}

// =============================================================================
// Interval merging
// =============================================================================

proptest! {
    /// Gap merging its own output changes nothing.
    #[test]
    fn gap_merge_is_idempotent(
        layout in peak_layout(),
        gap in 0.0f64..3.0,
        fps in prop::sample::select(vec![24.0, 25.0, 29.97, 30.0, 60.0]),
    ) {
        let strategy = GapMerge::new(gap);
        let once = merge(&peaks_from(&layout), fps, &strategy).unwrap();
        let twice = strategy.merge(&once);

        prop_assert_eq!(once, twice);
    }

    /// Merging never reorders, shrinks or overlaps intervals.
    #[test]
    fn merged_intervals_stay_ordered(
        layout in peak_layout(),
        fps in prop::sample::select(vec![25.0, 30.0]),
    ) {
        for strategy in [&GapMerge::default() as &dyn MergeStrategy, &PairMerge::default()] {
            let merged = merge(&peaks_from(&layout), fps, strategy).unwrap();
            for pair in merged.windows(2) {
                prop_assert!(pair[0].end_time < pair[1].start_time);
            }
            for interval in &merged {
                prop_assert!(interval.start_time <= interval.end_time);
            }
        }
    }
}

// =============================================================================
// Timeline assembly
// =============================================================================

proptest! {
    /// Entries chain end to start from zero and are numbered 1..N.
    #[test]
    fn timeline_is_gapless_and_numbered(
        layout in peak_layout(),
        delay in 0.01f64..1.0,
    ) {
        let intervals = merge(&peaks_from(&layout), 30.0, &GapMerge::default()).unwrap();
        let entries = assemble(&intervals, delay);

        prop_assert_eq!(entries.len(), intervals.len());
        prop_assert_eq!(entries[0].start_time, 0.0);
        for (i, entry) in entries.iter().enumerate() {
            prop_assert_eq!(entry.sequence as usize, i + 1);
            prop_assert!(entry.end_time > entry.start_time);
            prop_assert_eq!(&entry.payload, &format!("{:04}", i + 1));
        }
        for pair in entries.windows(2) {
            prop_assert_eq!(pair[1].start_time, pair[0].end_time);
        }
    }
}
