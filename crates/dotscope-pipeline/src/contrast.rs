//! Linear contrast scaling.

use image::GrayImage;

use crate::illumination::saturate;
use crate::params::ContrastParameters;
use crate::types::PipelineError;

/// Multiply every pixel by `alpha`, rounding halves to even and
/// saturating to `[0, 255]`.
///
/// `alpha == 1.0` returns an identical image.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] unless `alpha` is finite
/// and greater than zero.
pub fn adjust(image: &GrayImage, alpha: f64) -> Result<GrayImage, PipelineError> {
    let alpha = ContrastParameters { alpha }.validate()?;
    Ok(scale(image, alpha))
}

pub(crate) fn scale(image: &GrayImage, alpha: f64) -> GrayImage {
    tracing::debug!(alpha, "adjusting contrast");
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = f64::from(image.get_pixel(x, y).0[0]);
        image::Luma([saturate(alpha * v)])
    })
}

/// Number of pixels that `alpha` would push past 255.
#[must_use]
pub fn saturated_count(image: &GrayImage, alpha: f64) -> u64 {
    image
        .pixels()
        .map(|p| u64::from((alpha * f64::from(p.0[0])).round_ties_even() > 255.0))
        .sum()
}
