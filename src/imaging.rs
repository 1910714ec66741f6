//! Region cropping and pixel-difference similarity
//!
//! Shared by the signal scorer and the slide deduplicator. Every comparison
//! here works on single-channel 8-bit images.

use opencv::{core::{self, Mat, Rect, Size}, imgproc, prelude::*};
use tracing::trace;

use crate::common::{Result, SlidesubError};
use crate::config::RegionRatios;

/// Copy the ratio-defined region out of `frame`
pub fn crop_region(frame: &Mat, region: &RegionRatios) -> Result<Mat> {
    let rect = region.to_rect(frame.cols(), frame.rows())?;
    crop_rect(frame, rect)
}

pub fn crop_rect(frame: &Mat, rect: Rect) -> Result<Mat> {
    let view = Mat::roi(frame, rect)?;
    let mut cropped = Mat::default();
    view.copy_to(&mut cropped)?;
    Ok(cropped)
}

/// Single-channel copy of `image`; grayscale input is copied as-is
pub fn to_gray(image: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    match image.channels() {
        1 => image.copy_to(&mut gray)?,
        4 => imgproc::cvt_color_def(image, &mut gray, imgproc::COLOR_BGRA2GRAY)?,
        _ => imgproc::cvt_color_def(image, &mut gray, imgproc::COLOR_BGR2GRAY)?,
    }
    Ok(gray)
}

/// Apply the 3x3 centre-weighted sharpening kernel
pub fn sharpen(image: &Mat) -> Result<Mat> {
    let kernel = Mat::from_slice_2d(&[
        [-1.0f32, -1.0, -1.0],
        [-1.0, 9.0, -1.0],
        [-1.0, -1.0, -1.0],
    ])?;
    let mut sharpened = Mat::default();
    imgproc::filter_2d_def(image, &mut sharpened, -1, &kernel)?;
    Ok(sharpened)
}

/// Grayscale then Otsu-threshold to a 0/255 image
pub fn binarize(image: &Mat) -> Result<Mat> {
    let gray = to_gray(image)?;
    let mut binary = Mat::default();
    imgproc::threshold(&gray, &mut binary, 128.0, 255.0,
                       imgproc::THRESH_BINARY | imgproc::THRESH_OTSU)?;
    Ok(binary)
}

/// Resize `image` to exactly `size` (bilinear)
pub fn resize_to(image: &Mat, size: Size) -> Result<Mat> {
    let mut resized = Mat::default();
    imgproc::resize(image, &mut resized, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
    Ok(resized)
}

/// Similarity of two single-channel images in [0, 1], 1.0 meaning identical
///
/// `1 - sum(|base - other|) / (255 * rows * cols)`, computed at `base`'s
/// size. `other` is resized first when the dimensions differ.
pub fn similarity(base: &Mat, other: &Mat) -> Result<f64> {
    if base.empty() || other.empty() {
        return Err(SlidesubError::frame_error(0, "Cannot compare an empty image"));
    }

    let size = base.size()?;
    let other_size = other.size()?;
    let resized;
    let other = if size != other_size {
        trace!("Resizing {:?} to {:?} before comparison", other_size, size);
        resized = resize_to(other, size)?;
        &resized
    } else {
        other
    };

    let mut diff = Mat::default();
    core::absdiff(base, other, &mut diff)?;
    let total = core::sum_elems(&diff)?;

    let pixels = (base.rows() as f64) * (base.cols() as f64);
    let score = 1.0 - total[0] / (255.0 * pixels);

    trace!("Pixel similarity {:.5} over {} pixels", score, pixels);
    Ok(score)
}
