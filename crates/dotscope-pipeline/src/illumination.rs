//! Illumination correction: flatten slowly-varying background shading.
//!
//! The background is estimated by blurring the micrograph with a kernel
//! much larger than any dot, then subtracted. What remains is stretched
//! to the full `[0, 255]` range and lifted by a brightness offset so the
//! threshold that follows sees comparable intensities across the field.

use image::GrayImage;

use crate::blur;
use crate::params::{IlluminationParameters, KernelSize};
use crate::types::PipelineError;

/// Remove large-scale shading from `image`.
///
/// 1. `background = gaussian_blur(image, blur_kernel_size)`
/// 2. `diff = max(image - background, 0)`
/// 3. min-max normalize `diff` to `[0, 255]`
/// 4. add `brightness_offset`, saturating at both ends
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if `blur_kernel_size` is
/// zero or even. No pixel work is done in that case.
pub fn correct(
    image: &GrayImage,
    params: &IlluminationParameters,
) -> Result<GrayImage, PipelineError> {
    let kernel = params.validate()?;
    Ok(correct_with(image, kernel, params.brightness_offset))
}

pub(crate) fn correct_with(
    image: &GrayImage,
    kernel: KernelSize,
    brightness_offset: i32,
) -> GrayImage {
    let background = blur::gaussian_blur(image, kernel);
    let flattened = subtract_background(image, &background);
    let normalized = normalize_min_max(&flattened);
    tracing::debug!(%kernel, brightness_offset, "corrected illumination");
    offset_brightness(&normalized, brightness_offset)
}

/// Pixel-wise `image - background`, saturating at zero.
#[must_use = "returns the background-subtracted image"]
pub fn subtract_background(image: &GrayImage, background: &GrayImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        let b = background.get_pixel(x, y).0[0];
        image::Luma([v.saturating_sub(b)])
    })
}

/// Linearly stretch `image` so its darkest pixel becomes 0 and its
/// brightest 255.
///
/// A flat image (including an empty one) has no range to stretch and
/// maps to all zeros.
#[must_use = "returns the normalized image"]
pub fn normalize_min_max(image: &GrayImage) -> GrayImage {
    let (lo, hi) = intensity_range(image).unwrap_or((0, 0));
    if hi <= lo {
        return GrayImage::new(image.width(), image.height());
    }
    let lo_f = f64::from(lo);
    let scale = 255.0 / f64::from(hi - lo);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = f64::from(image.get_pixel(x, y).0[0]);
        image::Luma([saturate((v - lo_f) * scale)])
    })
}

/// Add `offset` to every pixel, clamping to `[0, 255]`.
#[must_use = "returns the brightened image"]
pub fn offset_brightness(image: &GrayImage, offset: i32) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = i32::from(image.get_pixel(x, y).0[0]) + offset;
        image::Luma([u8::try_from(v.clamp(0, 255)).unwrap_or(u8::MAX)])
    })
}

/// Darkest and brightest pixel values, or `None` for an empty image.
#[must_use]
pub fn intensity_range(image: &GrayImage) -> Option<(u8, u8)> {
    image.pixels().map(|p| p.0[0]).fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Round (halves to even) and clamp a real intensity into a `u8`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn saturate(v: f64) -> u8 {
    if v.is_nan() {
        return 0;
    }
    v.round_ties_even().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Bright dots on a left-to-right brightness ramp.
    fn shaded_dots() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let ramp = 40 + x;
            let on_dot = [(16u32, 16u32), (48, 48)]
                .iter()
                .any(|&(cx, cy)| x.abs_diff(cx) <= 2 && y.abs_diff(cy) <= 2);
            let v = if on_dot { ramp + 100 } else { ramp };
            image::Luma([u8::try_from(v).unwrap()])
        })
    }

    fn params(blur_kernel_size: u32, brightness_offset: i32) -> IlluminationParameters {
        IlluminationParameters {
            blur_kernel_size,
            brightness_offset,
        }
    }

    #[test]
    fn even_kernel_is_rejected() {
        let err = correct(&GrayImage::new(4, 4), &params(4, 30)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidParameter {
                parameter: "blur_kernel_size",
                ..
            }
        ));
    }

    #[test]
    fn zero_kernel_is_rejected() {
        assert!(correct(&GrayImage::new(4, 4), &params(0, 30)).is_err());
    }

    #[test]
    fn subtract_saturates_at_zero() {
        let image = GrayImage::from_fn(2, 1, |x, _| image::Luma([if x == 0 { 10 } else { 200 }]));
        let background = GrayImage::from_fn(2, 1, |_, _| image::Luma([50]));
        let diff = subtract_background(&image, &background);
        assert_eq!(diff.get_pixel(0, 0).0[0], 0);
        assert_eq!(diff.get_pixel(1, 0).0[0], 150);
    }

    #[test]
    fn normalize_stretches_to_full_range() {
        let image = GrayImage::from_fn(3, 1, |x, _| image::Luma([[20, 30, 40][x as usize]]));
        let normalized = normalize_min_max(&image);
        assert_eq!(normalized.get_pixel(0, 0).0[0], 0);
        assert_eq!(normalized.get_pixel(1, 0).0[0], 128);
        assert_eq!(normalized.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn normalize_flat_image_is_black() {
        let image = GrayImage::from_fn(4, 4, |_, _| image::Luma([77]));
        assert!(normalize_min_max(&image).pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn offset_clamps_both_ways() {
        let image = GrayImage::from_fn(2, 1, |x, _| image::Luma([if x == 0 { 10 } else { 240 }]));
        let up = offset_brightness(&image, 30);
        assert_eq!(up.get_pixel(0, 0).0[0], 40);
        assert_eq!(up.get_pixel(1, 0).0[0], 255);
        let down = offset_brightness(&image, -30);
        assert_eq!(down.get_pixel(0, 0).0[0], 0);
        assert_eq!(down.get_pixel(1, 0).0[0], 210);
    }

    #[test]
    fn flat_image_becomes_offset() {
        let image = GrayImage::from_fn(16, 16, |_, _| image::Luma([90]));
        let corrected = correct(&image, &params(5, 30)).unwrap();
        assert!(corrected.pixels().all(|p| p.0[0] == 30));
    }

    #[test]
    fn default_offset_lifts_flat_image_to_thirty() {
        let image = GrayImage::from_fn(16, 16, |_, _| image::Luma([90]));
        let corrected = correct(&image, &IlluminationParameters::new(5)).unwrap();
        assert!(corrected.pixels().all(|p| p.0[0] == 30));
    }

    #[test]
    fn correction_keeps_dots_brightest() {
        let corrected = correct(&shaded_dots(), &params(31, 0)).unwrap();
        let (lo, hi) = intensity_range(&corrected).unwrap();
        assert_eq!((lo, hi), (0, 255));

        // Both dots stand out above the flattened background, even
        // though the ramp makes the right side brighter overall.
        let left_dot = corrected.get_pixel(16, 16).0[0];
        let right_dot = corrected.get_pixel(48, 48).0[0];
        let left_bg = corrected.get_pixel(4, 40).0[0];
        let right_bg = corrected.get_pixel(60, 20).0[0];
        assert!(left_dot > right_bg, "left dot {left_dot} vs right background {right_bg}");
        assert!(right_dot > left_bg, "right dot {right_dot} vs left background {left_bg}");
    }

    #[test]
    fn correction_is_deterministic() {
        let image = shaded_dots();
        let params = params(31, 30);
        assert_eq!(correct(&image, &params).unwrap(), correct(&image, &params).unwrap());
    }

    #[test]
    fn intensity_range_of_empty_is_none() {
        assert_eq!(intensity_range(&GrayImage::new(0, 0)), None);
    }
}
