//! Video stream handling using OpenCV backend
//!
//! The pipeline reads the video twice: one sequential pass to score every
//! frame, then random-access seeks to capture slides. [`FrameSource`] is the
//! seam both passes go through; [`VideoStream`] implements it on top of
//! OpenCV's VideoCapture.

use opencv::{videoio, core::Mat, prelude::*};
use tracing::{instrument, debug, warn, info};
use std::path::Path;
use crate::common::{Result, SlidesubError};

/// A decoded video that can be read sequentially and re-positioned
pub trait FrameSource {
    /// Constant frame rate of the stream
    fn fps(&self) -> f64;

    /// `(width, height)` of every decoded frame in pixels
    fn frame_size(&self) -> (i32, i32);

    /// Container-reported frame count; may be an estimate
    fn frame_count(&self) -> u32;

    /// Decode the next frame, `None` at end of stream
    fn read_frame(&mut self) -> Result<Option<Mat>>;

    /// Position the stream so the next `read_frame` yields `frame_index`
    fn seek(&mut self, frame_index: u32) -> Result<()>;

    /// Seek then decode one frame
    fn read_frame_at(&mut self, frame_index: u32) -> Result<Option<Mat>> {
        self.seek(frame_index)?;
        self.read_frame()
    }
}

/// Wrapper around OpenCV VideoCapture for consistent video reading
pub struct VideoStream {
    cap: videoio::VideoCapture,
    fps: f64,
    frame_count: i32,
    current_frame: i32,
    width: i32,
    height: i32,
    path: String,
}

impl VideoStream {
    /// Open a video file for reading
    ///
    /// # Errors
    /// * `VideoNotFound` - If the file doesn't exist
    /// * `VideoOpenFailed` - If OpenCV can't open the file
    /// * `InvalidVideoFormat` - If the stream reports no usable fps or size
    /// * `EmptySignal` - If the video has no frames
    #[instrument]
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy().to_string();
        info!("Opening video stream: {}", path_str);

        if !path.exists() {
            return Err(SlidesubError::VideoNotFound {
                path: path_str
            });
        }

        let cap = videoio::VideoCapture::from_file(&path_str, videoio::CAP_ANY)
            .map_err(|e| {
                warn!("Failed to create VideoCapture: {}", e);
                SlidesubError::VideoOpenFailed {
                    path: path_str.clone()
                }
            })?;

        let is_opened = cap.is_opened().map_err(|e| {
            warn!("Failed to check if VideoCapture is opened: {}", e);
            SlidesubError::VideoOpenFailed {
                path: path_str.clone()
            }
        })?;

        if !is_opened {
            return Err(SlidesubError::VideoOpenFailed {
                path: path_str
            });
        }

        let property = |id: i32, name: &str| {
            cap.get(id).map_err(|e| {
                warn!("Failed to get video {}: {}", name, e);
                SlidesubError::InvalidVideoFormat {
                    path: path_str.clone()
                }
            })
        };

        let fps = property(videoio::CAP_PROP_FPS, "fps")?;
        let frame_count = property(videoio::CAP_PROP_FRAME_COUNT, "frame count")? as i32;
        let width = property(videoio::CAP_PROP_FRAME_WIDTH, "frame width")? as i32;
        let height = property(videoio::CAP_PROP_FRAME_HEIGHT, "frame height")? as i32;

        if fps <= 0.0 || width <= 0 || height <= 0 {
            return Err(SlidesubError::InvalidVideoFormat {
                path: path_str
            });
        }

        if frame_count <= 0 {
            return Err(SlidesubError::EmptySignal);
        }

        info!("Video opened successfully - FPS: {}, Frames: {}, Size: {}x{}",
              fps, frame_count, width, height);

        Ok(Self {
            cap,
            fps,
            frame_count,
            current_frame: 0,
            width,
            height,
            path: path_str,
        })
    }

    /// Get the frame width in pixels
    pub fn width(&self) -> i32 {
        self.width
    }

    /// Get the frame height in pixels
    pub fn height(&self) -> i32 {
        self.height
    }

    /// Get the video file path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the video duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frame_count as f64 / self.fps
    }
}

impl FrameSource for VideoStream {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    fn frame_count(&self) -> u32 {
        self.frame_count.max(0) as u32
    }

    #[instrument(skip(self))]
    fn read_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();

        let success = self.cap.read(&mut frame).map_err(|e| {
            SlidesubError::frame_error(
                self.current_frame as u32,
                format!("OpenCV read failed: {}", e)
            )
        })?;

        if !success || frame.empty() {
            debug!("Reached end of video at frame {}", self.current_frame);
            return Ok(None);
        }

        if frame.rows() != self.height || frame.cols() != self.width {
            return Err(SlidesubError::frame_error(
                self.current_frame as u32,
                format!("Frame size {}x{} differs from stream size {}x{}",
                        frame.cols(), frame.rows(), self.width, self.height)
            ));
        }

        self.current_frame += 1;
        Ok(Some(frame))
    }

    #[instrument(skip(self))]
    fn seek(&mut self, frame_index: u32) -> Result<()> {
        let accepted = self.cap.set(videoio::CAP_PROP_POS_FRAMES, frame_index as f64)
            .map_err(|e| SlidesubError::frame_error(frame_index, format!("Seek failed: {}", e)))?;

        if !accepted {
            return Err(SlidesubError::frame_error(frame_index, "Backend refused seek"));
        }

        debug!("Seeked to frame {}", frame_index);
        self.current_frame = frame_index as i32;
        Ok(())
    }
}

// Implement Debug manually to avoid showing internal OpenCV state
impl std::fmt::Debug for VideoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoStream")
            .field("path", &self.path)
            .field("fps", &self.fps)
            .field("frame_count", &self.frame_count)
            .field("current_frame", &self.current_frame)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}
