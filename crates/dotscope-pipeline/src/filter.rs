//! Filter chain: blur -> threshold -> morphological opening.
//!
//! Each filter is optional. The order is fixed regardless of which
//! filters are enabled, and an absent filter passes its input through
//! unchanged.
//!
//! Opening is a grayscale minimum filter followed by a maximum filter
//! over a square window ([`imageproc::morphology::grayscale_open`]).
//! On a 0/255 mask this is ordinary binary opening: isolated specks
//! smaller than the window disappear, larger blobs keep their size.

use image::GrayImage;
use imageproc::morphology::{self, Mask};

use crate::blur;
use crate::params::{FilterParameters, KernelSize, ValidFilters};
use crate::types::PipelineError;

/// Run the filter chain described by `params` over `image`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if a kernel size is zero
/// or even, or the threshold is outside `[0, 255]`. Validation happens
/// before any filter runs.
pub fn apply(image: &GrayImage, params: &FilterParameters) -> Result<GrayImage, PipelineError> {
    let filters = params.validate()?;
    Ok(apply_valid(image, filters))
}

pub(crate) fn apply_valid(image: &GrayImage, filters: ValidFilters) -> GrayImage {
    let blurred = match filters.gaussian_blur {
        Some(kernel) => blur::gaussian_blur(image, kernel),
        None => image.clone(),
    };
    let binarized = match filters.threshold {
        Some(level) => threshold(&blurred, level),
        None => blurred,
    };
    let opened = match filters.morph_open {
        Some(kernel) => open(&binarized, kernel),
        None => binarized,
    };
    tracing::debug!(?filters, "applied filters");
    opened
}

/// Binary threshold: pixels `>= level` become 255, the rest 0.
#[must_use = "returns the binarized image"]
pub fn threshold(image: &GrayImage, level: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y).0[0] >= level {
            image::Luma([255])
        } else {
            image::Luma([0])
        }
    })
}

/// Grayscale erosion (local minimum) over a square window.
#[must_use = "returns the eroded image"]
pub fn erode(image: &GrayImage, kernel: KernelSize) -> GrayImage {
    morphology::grayscale_erode(image, &square_mask(kernel))
}

/// Grayscale dilation (local maximum) over a square window.
#[must_use = "returns the dilated image"]
pub fn dilate(image: &GrayImage, kernel: KernelSize) -> GrayImage {
    morphology::grayscale_dilate(image, &square_mask(kernel))
}

/// Morphological opening: [`erode`] then [`dilate`].
#[must_use = "returns the opened image"]
pub fn open(image: &GrayImage, kernel: KernelSize) -> GrayImage {
    morphology::grayscale_open(image, &square_mask(kernel))
}

/// Square structuring element covering `kernel`.
///
/// Window samples outside the image are ignored by the morphology
/// operators. `morph_open` is capped at [`MAX_MORPH_OPEN`] during
/// validation, so the radius always fits.
///
/// [`MAX_MORPH_OPEN`]: crate::params::MAX_MORPH_OPEN
fn square_mask(kernel: KernelSize) -> Mask {
    Mask::square(u8::try_from(kernel.radius()).unwrap_or(u8::MAX))
}
