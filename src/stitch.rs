//! Long-image sheets stacked from a slide directory
//!
//! Slides are taken in file name order, so canonical slides and their
//! variants stay together, and stacked top to bottom in groups. Every slide
//! is scaled to the width of the first one in its group.

use std::fs;
use std::path::{Path, PathBuf};

use opencv::{
    core::{self, Mat, Size, Vector},
    imgcodecs,
    prelude::*,
};
use tracing::{debug, info, instrument, warn};

use crate::common::{Result, SlidesubError};
use crate::deduplicator::SlideDirectory;
use crate::imaging;

pub const DEFAULT_STITCH_GROUP_SIZE: usize = 4;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Sibling directory receiving the sheets, `<slides>-long`
pub fn long_dir(slides_dir: &Path) -> Result<PathBuf> {
    let name = slides_dir.file_name().ok_or_else(|| {
        SlidesubError::config_error(format!("{} does not name a directory", slides_dir.display()))
    })?;
    let mut long_name = name.to_os_string();
    long_name.push("-long");
    Ok(slides_dir.with_file_name(long_name))
}

/// Image files directly inside `dir`, sorted by name
pub fn slide_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)));
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Stack the slides of `slides_dir` into `long_NNNN.png` sheets of
/// `group_size` slides each; the last sheet may hold fewer.
///
/// Returns the written sheet paths in order. An empty directory writes
/// nothing.
#[instrument(skip_all, fields(dir = %slides_dir.display(), group_size))]
pub fn stitch_slides(slides_dir: &Path, group_size: usize) -> Result<Vec<PathBuf>> {
    if group_size == 0 {
        return Err(SlidesubError::config_error("group size must be at least 1"));
    }

    let images = slide_images(slides_dir)?;
    if images.is_empty() {
        warn!("No slide images in {}", slides_dir.display());
        return Ok(Vec::new());
    }

    let out_dir = long_dir(slides_dir)?;
    fs::create_dir_all(&out_dir)?;

    let mut sheets = Vec::with_capacity(images.len().div_ceil(group_size));
    for (index, group) in images.chunks(group_size).enumerate() {
        let sheet = stack_vertically(group)?;
        let path = out_dir.join(format!("long_{:04}.png", index));
        SlideDirectory::write_image(&path, &sheet)?;

        debug!("Sheet {} ({}x{}) from {} slides", path.display(), sheet.cols(), sheet.rows(), group.len());
        sheets.push(path);
    }

    info!("Stitched {} slides into {} sheets in {}", images.len(), sheets.len(), out_dir.display());
    Ok(sheets)
}

fn stack_vertically(paths: &[PathBuf]) -> Result<Mat> {
    let mut parts = Vector::<Mat>::new();
    let mut width = None;

    for path in paths {
        let path_str = path.to_string_lossy();
        let image = imgcodecs::imread(&path_str, imgcodecs::IMREAD_COLOR)?;
        if image.empty() {
            return Err(SlidesubError::frame_error(0, format!("could not decode {}", path_str)));
        }

        let target = *width.get_or_insert(image.cols());
        if image.cols() == target {
            parts.push(image);
        } else {
            let height = ((image.rows() as f64) * (target as f64) / (image.cols() as f64)).round().max(1.0);
            parts.push(imaging::resize_to(&image, Size::new(target, height as i32))?);
        }
    }

    let mut sheet = Mat::default();
    core::vconcat(&parts, &mut sheet)?;
    Ok(sheet)
}
