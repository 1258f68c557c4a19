//! Image ingestion and color-space conversion.
//!
//! Micrographs arrive as files (TIFF, PNG, JPEG, BMP, WebP) and are
//! reduced to a single 8-bit luma channel before anything else happens.
//! [`decode_grayscale`] works on in-memory bytes; [`load_image`] is the
//! thin file-reading wrapper around it.

use std::path::Path;

use image::{GrayImage, RgbImage};

use crate::types::PipelineError;

const MEMORY_ORIGIN: &str = "<memory>";

/// Decode raw image bytes and convert to grayscale.
///
/// Supports whatever formats the `image` crate was built with. Color
/// inputs are reduced with the standard luminance weights.
///
/// # Errors
///
/// Returns [`PipelineError::ImageLoad`] if `bytes` is empty, the format
/// is unrecognized, or the data is corrupt.
pub fn decode_grayscale(bytes: &[u8]) -> Result<GrayImage, PipelineError> {
    decode_with_origin(bytes, MEMORY_ORIGIN)
}

/// Read an image file and convert it to grayscale.
///
/// # Errors
///
/// Returns [`PipelineError::ImageLoad`] if the file cannot be read or
/// decoded.
pub fn load_image(path: impl AsRef<Path>) -> Result<GrayImage, PipelineError> {
    let path = path.as_ref();
    let origin = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| PipelineError::ImageLoad {
        origin: origin.clone(),
        reason: e.to_string(),
    })?;
    let image = decode_with_origin(&bytes, &origin)?;
    tracing::debug!(
        path = %origin,
        width = image.width(),
        height = image.height(),
        "loaded image",
    );
    Ok(image)
}

fn decode_with_origin(bytes: &[u8], origin: &str) -> Result<GrayImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::ImageLoad {
            origin: origin.to_owned(),
            reason: "input image data is empty".to_owned(),
        });
    }
    let decoded = image::load_from_memory(bytes).map_err(|e| PipelineError::ImageLoad {
        origin: origin.to_owned(),
        reason: e.to_string(),
    })?;
    Ok(decoded.to_luma8())
}

/// Expand a grayscale image to three identical color channels.
#[must_use = "returns the color image"]
pub fn to_rgb(image: &GrayImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        image::Rgb([v, v, v])
    })
}
