//! Dot counting: keep blobs that are large enough and mark them.
//!
//! A blob counts as a dot iff its area is at least the size threshold
//! (inclusive). Every accepted dot gets a small red square drawn at its
//! rounded centroid on color copies of both the processed image and the
//! original micrograph.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::blob;
use crate::grayscale::to_rgb;
use crate::params::{Connectivity, CountParameters};
use crate::types::{Blob, PipelineError, Point};

/// Edge length of the square drawn at each accepted centroid.
pub const MARKER_SIZE: u32 = 3;

/// Color of the centroid markers.
pub const MARKER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Outcome of one dot-counting pass.
///
/// The count is derived from the centroid list, so the two can never
/// disagree.
#[derive(Debug, Clone)]
pub struct DotCountResult {
    dots: Vec<Blob>,
    centroids: Vec<Point>,
    rejected: usize,
    annotated_processed: RgbImage,
    annotated_original: RgbImage,
}

impl DotCountResult {
    /// Number of accepted dots.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.centroids.len()
    }

    /// Centroids of the accepted dots, in ascending label order.
    #[must_use]
    pub fn centroids(&self) -> &[Point] {
        &self.centroids
    }

    /// The accepted blobs, in the same order as [`centroids`](Self::centroids).
    #[must_use]
    pub fn dots(&self) -> &[Blob] {
        &self.dots
    }

    /// Number of blobs found but rejected as too small.
    #[must_use]
    pub const fn rejected(&self) -> usize {
        self.rejected
    }

    /// Color copy of the processed image with a marker on every dot.
    #[must_use]
    pub const fn annotated_processed(&self) -> &RgbImage {
        &self.annotated_processed
    }

    /// Color copy of the original image with a marker on every dot.
    #[must_use]
    pub const fn annotated_original(&self) -> &RgbImage {
        &self.annotated_original
    }
}

/// Count the dots in `processed` and annotate both images.
///
/// Blobs are detected on `processed` (re-binarized internally); the
/// original image only receives markers. Finding no dot is a valid
/// result with a count of zero.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if `size_threshold` is
/// negative or `connectivity` is neither 4 nor 8.
pub fn count_dots(
    original: &GrayImage,
    processed: &GrayImage,
    size_threshold: i64,
    connectivity: u8,
) -> Result<DotCountResult, PipelineError> {
    let (min_area, connectivity) = CountParameters {
        size_threshold,
        connectivity,
    }
    .validate()?;
    Ok(count_valid(original, processed, min_area, connectivity))
}

pub(crate) fn count_valid(
    original: &GrayImage,
    processed: &GrayImage,
    min_area: u64,
    connectivity: Connectivity,
) -> DotCountResult {
    let blobs = blob::detect(processed, connectivity);
    let total = blobs.len();
    let dots: Vec<Blob> = blobs.into_iter().filter(|b| b.area >= min_area).collect();
    let centroids: Vec<Point> = dots.iter().map(|b| b.centroid).collect();

    let annotated_processed = annotate(processed, &centroids);
    let annotated_original = annotate(original, &centroids);

    tracing::info!(
        dots = centroids.len(),
        rejected = total - dots.len(),
        min_area,
        "counted dots",
    );

    DotCountResult {
        rejected: total - dots.len(),
        dots,
        centroids,
        annotated_processed,
        annotated_original,
    }
}

/// Color copy of `image` with a [`MARKER_SIZE`] square at each centroid.
///
/// Markers are centred on the nearest pixel and clipped at the image
/// border.
#[must_use = "returns the annotated image"]
pub fn annotate(image: &GrayImage, centroids: &[Point]) -> RgbImage {
    let mut canvas = to_rgb(image);
    let half = i32::try_from(MARKER_SIZE / 2).unwrap_or(0);
    for (cx, cy) in centroids.iter().filter_map(|c| c.to_pixel()) {
        let marker = Rect::at(cx - half, cy - half).of_size(MARKER_SIZE, MARKER_SIZE);
        draw_filled_rect_mut(&mut canvas, marker, MARKER_COLOR);
    }
    canvas
}
