//! Common types, utilities, and error handling for the dialogue timing library.
//!
//! This module provides the foundational types used throughout the codebase:
//! frame timecodes, similarity samples, peaks, intervals, and the crate-wide
//! error type.

use serde::Serialize;
use tracing::{instrument, debug};

/// Represents a specific point in time within a video
///
/// This type encapsulates both the frame number and framerate information,
/// allowing for precise temporal calculations and conversions.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTimecode {
    frame_number: u32,
    fps: f64,
}

impl FrameTimecode {
    /// Create a new FrameTimecode
    ///
    /// # Arguments
    /// * `frame_number` - The frame number (0-indexed)
    /// * `fps` - Frames per second of the video
    ///
    /// # Panics
    /// Panics if fps is not positive (fail-fast approach)
    pub fn new(frame_number: u32, fps: f64) -> Self {
        assert!(fps > 0.0, "FPS must be positive, got: {}", fps);

        Self { frame_number, fps }
    }

    /// Build the timecode of the frame shown at `seconds`
    ///
    /// Rounds to the nearest frame so that `from_seconds(tc.seconds())`
    /// recovers the original frame number despite float error.
    pub fn from_seconds(seconds: f64, fps: f64) -> Self {
        let frame = (seconds.max(0.0) * fps).round();
        Self::new(frame.min(u32::MAX as f64) as u32, fps)
    }

    /// Get the frame number
    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Get the framerate
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Convert to seconds since start of video
    pub fn seconds(&self) -> f64 {
        self.frame_number as f64 / self.fps
    }
}

/// One scored frame of the similarity signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub frame_index: u32,
    pub score: f64,
}

impl Sample {
    pub fn new(frame_index: u32, score: f64) -> Self {
        Self { frame_index, score }
    }
}

/// A maximal run of samples at or above the peak threshold
///
/// Both ends are inclusive frame indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Peak {
    pub start_frame: u32,
    pub end_frame: u32,
}

impl Peak {
    /// # Panics
    /// Panics if `end_frame < start_frame`
    pub fn new(start_frame: u32, end_frame: u32) -> Self {
        assert!(end_frame >= start_frame,
                "Peak end frame must not precede start frame: {} < {}", end_frame, start_frame);
        Self { start_frame, end_frame }
    }

    /// Number of frames covered by this peak
    pub fn len_frames(&self) -> u32 {
        self.end_frame - self.start_frame + 1
    }

    /// Convert frame bounds to seconds
    #[instrument(level = "trace")]
    pub fn to_interval(&self, fps: f64) -> Interval {
        let start = FrameTimecode::new(self.start_frame, fps);
        let end = FrameTimecode::new(self.end_frame, fps);

        Interval::new(start.seconds(), end.seconds())
    }
}

/// A logical dialogue event in seconds
///
/// The start time is fixed at creation. The end time may only move forward,
/// see [`Interval::extend_to`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    pub start_time: f64,
    pub end_time: f64,
}

impl Interval {
    /// # Panics
    /// Panics if `end_time < start_time`
    pub fn new(start_time: f64, end_time: f64) -> Self {
        assert!(end_time >= start_time,
                "Interval end must not precede start: {} < {}", end_time, start_time);
        Self { start_time, end_time }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Move the end forward to `end_time`; an earlier value is ignored.
    pub fn extend_to(&mut self, end_time: f64) {
        if end_time > self.end_time {
            debug!("Extending interval {:.3}s end {:.3}s -> {:.3}s",
                   self.start_time, self.end_time, end_time);
            self.end_time = end_time;
        }
    }
}

/// All possible errors from the dialogue timing pipeline
///
/// Configuration and input errors are raised before any output is written.
/// Per-interval capture failures never surface here; the deduplicator
/// counts and logs them instead.
#[derive(Debug, thiserror::Error)]
pub enum SlidesubError {
    #[error("Failed to open video file: {path}")]
    VideoOpenFailed { path: String },

    #[error("Video file not found: {path}")]
    VideoNotFound { path: String },

    #[error("Invalid video format or corrupted file: {path}")]
    InvalidVideoFormat { path: String },

    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Unsupported frame geometry: {message}")]
    UnsupportedGeometry { message: String },

    #[error("Reference image unusable: {path}: {reason}")]
    ReferenceImage { path: String, reason: String },

    #[error("Frame processing failed at frame {frame}: {reason}")]
    FrameProcessingFailed { frame: u32, reason: String },

    #[error("Similarity signal is empty")]
    EmptySignal,

    #[error("Malformed SRT at line {line}: {reason}")]
    SrtParse { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SlidesubError {
    /// Create a configuration error with a descriptive message
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration { message: message.into() }
    }

    /// Create a frame processing error
    pub fn frame_error(frame: u32, reason: impl Into<String>) -> Self {
        Self::FrameProcessingFailed {
            frame,
            reason: reason.into()
        }
    }

    /// Create a geometry error (bad aspect ratio, empty crop region)
    pub fn geometry_error(message: impl Into<String>) -> Self {
        Self::UnsupportedGeometry { message: message.into() }
    }

    pub(crate) fn srt_error(line: usize, reason: impl Into<String>) -> Self {
        Self::SrtParse { line, reason: reason.into() }
    }
}

/// Convenient Result type for pipeline operations
pub type Result<T> = std::result::Result<T, SlidesubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timecode_creation() {
        let tc = FrameTimecode::new(100, 25.0);
        assert_eq!(tc.frame_number(), 100);
        assert_eq!(tc.fps(), 25.0);
        assert_eq!(tc.seconds(), 4.0);
    }

    #[test]
    #[should_panic(expected = "FPS must be positive")]
    fn test_frame_timecode_invalid_fps_zero() {
        FrameTimecode::new(100, 0.0);
    }

    #[test]
    fn test_frame_timecode_from_seconds_round_trips_frame() {
        for frame in [0u32, 1, 10, 29, 30, 1234] {
            let secs = FrameTimecode::new(frame, 29.97).seconds();
            assert_eq!(FrameTimecode::from_seconds(secs, 29.97).frame_number(), frame);
        }
        assert_eq!(FrameTimecode::from_seconds(-1.0, 30.0).frame_number(), 0);
    }

    #[test]
    fn test_peak_to_interval() {
        let peak = Peak::new(10, 14);
        assert_eq!(peak.len_frames(), 5);

        let interval = peak.to_interval(30.0);
        assert!((interval.start_time - 10.0 / 30.0).abs() < 1e-12);
        assert!((interval.end_time - 14.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "Peak end frame must not precede start frame")]
    fn test_peak_invalid_order() {
        Peak::new(20, 10);
    }

    #[test]
    fn test_interval_extend_never_shrinks() {
        let mut interval = Interval::new(1.0, 2.0);
        interval.extend_to(3.5);
        assert_eq!(interval.end_time, 3.5);

        interval.extend_to(2.5);
        assert_eq!(interval.end_time, 3.5);
        assert_eq!(interval.start_time, 1.0);
        assert_eq!(interval.duration(), 2.5);
    }

    #[test]
    #[should_panic(expected = "Interval end must not precede start")]
    fn test_interval_invalid_order() {
        Interval::new(2.0, 1.0);
    }

    #[test]
    fn test_error_types() {
        let error = SlidesubError::config_error("Invalid ratio");
        assert!(matches!(error, SlidesubError::InvalidConfiguration { .. }));

        let error = SlidesubError::frame_error(42, "Processing failed");
        assert!(matches!(error, SlidesubError::FrameProcessingFailed { frame: 42, .. }));

        let error = SlidesubError::geometry_error("not 9:16");
        assert!(matches!(error, SlidesubError::UnsupportedGeometry { .. }));
    }

    #[test]
    fn test_error_display() {
        let error = SlidesubError::VideoNotFound {
            path: "test.mp4".to_string()
        };
        assert_eq!(error.to_string(), "Video file not found: test.mp4");

        let error = SlidesubError::config_error("peak_ratio must be in (0, 1]");
        assert_eq!(error.to_string(), "Invalid configuration: peak_ratio must be in (0, 1]");

        assert_eq!(SlidesubError::EmptySignal.to_string(), "Similarity signal is empty");
    }
}
