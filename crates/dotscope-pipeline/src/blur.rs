//! Gaussian blur parameterised by kernel size.
//!
//! Users tune blur by kernel edge length (5, 101, ...) rather than by
//! sigma, so [`sigma_for_kernel`] maps an odd kernel size to the sigma
//! conventionally associated with it. The window is exactly the given
//! size: [`gaussian_kernel`] samples that many taps and the smoothing
//! is done by [`imageproc::filter::separable_filter_equal`].
//!
//! The same blur serves two purposes: light denoising in the filter
//! chain and, with a very large kernel, background estimation for
//! illumination correction.

use image::GrayImage;

use crate::params::KernelSize;

/// Sigma conventionally paired with an odd kernel size `k`:
/// `0.3 * ((k - 1) * 0.5 - 1) + 0.8`.
#[must_use]
pub fn sigma_for_kernel(kernel: KernelSize) -> f32 {
    let k = f64::from(kernel.get());
    #[allow(clippy::cast_possible_truncation)]
    let sigma = 0.3f64.mul_add((k - 1.0).mul_add(0.5, -1.0), 0.8) as f32;
    sigma
}

/// Normalized 1-D Gaussian weights, one per tap of `kernel`.
#[must_use]
pub fn gaussian_kernel(kernel: KernelSize) -> Vec<f32> {
    let sigma = f64::from(sigma_for_kernel(kernel));
    let centre = f64::from(kernel.radius());
    let weights: Vec<f64> = (0..kernel.get())
        .map(|i| {
            let d = f64::from(i) - centre;
            (-d * d / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    #[allow(clippy::cast_possible_truncation)]
    let taps = weights.iter().map(|w| (w / total) as f32).collect();
    taps
}

/// Blur a grayscale image with a Gaussian of the given kernel size.
///
/// The window spans exactly `kernel` pixels in each direction; pixels
/// beyond the image border repeat the nearest edge pixel. A 1x1 kernel
/// is the identity and returns a copy of the input.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, kernel: KernelSize) -> GrayImage {
    if kernel.get() == 1 {
        return image.clone();
    }

    imageproc::filter::separable_filter_equal(image, &gaussian_kernel(kernel))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn kernel(size: u32) -> KernelSize {
        KernelSize::new("gaussian_blur", size).unwrap()
    }

    /// Create a test image with a sharp black-to-white boundary at x=5.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn sigma_matches_conventional_mapping() {
        assert!((sigma_for_kernel(kernel(3)) - 0.8).abs() < 1e-6);
        assert!((sigma_for_kernel(kernel(5)) - 1.1).abs() < 1e-6);
        assert!((sigma_for_kernel(kernel(101)) - 15.5).abs() < 1e-4);
    }

    #[test]
    fn kernel_has_one_tap_per_pixel_and_sums_to_one() {
        for size in [3, 5, 51, 101] {
            let taps = gaussian_kernel(kernel(size));
            assert_eq!(taps.len(), size as usize);
            let total: f32 = taps.iter().sum();
            assert!((total - 1.0).abs() < 1e-4, "k={size} sums to {total}");
            let mid = taps.len() / 2;
            assert!(taps.iter().all(|&t| t <= taps[mid]));
            assert!((taps[0] - taps[taps.len() - 1]).abs() < f32::EPSILON);
        }
    }

    /// 251x1 black row with the given pixels set to 255.
    fn bright_run(range: std::ops::RangeInclusive<u32>) -> GrayImage {
        GrayImage::from_fn(251, 1, |x, _| {
            image::Luma([if range.contains(&x) { 255 } else { 0 }])
        })
    }

    #[test]
    fn wide_kernel_reaches_its_full_radius() {
        // Bright pixels 32 to 50 px from the centre sit inside a 101-tap
        // window.
        let blurred = gaussian_blur(&bright_run(132..=150), kernel(101));
        assert!(blurred.get_pixel(100, 0).0[0] > 0);
    }

    #[test]
    fn wide_kernel_stops_at_its_radius() {
        let blurred = gaussian_blur(&bright_run(151..=170), kernel(101));
        assert_eq!(blurred.get_pixel(100, 0).0[0], 0);
    }

    #[test]
    fn unit_kernel_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur(&img, kernel(1)), img);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = gaussian_blur(&img, kernel(5));
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, kernel(7));

        let left_of_edge = blurred.get_pixel(4, 5).0[0];
        let right_of_edge = blurred.get_pixel(5, 5).0[0];
        assert!(
            left_of_edge > 0,
            "expected blur to raise left-of-edge above 0, got {left_of_edge}",
        );
        assert!(
            right_of_edge < 255,
            "expected blur to lower right-of-edge below 255, got {right_of_edge}",
        );
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = GrayImage::from_fn(10, 10, |_, _| image::Luma([128]));
        let blurred = gaussian_blur(&img, kernel(5));
        for pixel in blurred.pixels() {
            let diff = i16::from(pixel.0[0]) - 128;
            assert!(
                diff.abs() <= 1,
                "expected uniform image to stay near 128 after blur, got {}",
                pixel.0[0],
            );
        }
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn blur_is_deterministic() {
        let img = GrayImage::from_fn(20, 20, |x, y| image::Luma([((x * 13 + y * 7) % 256) as u8]));
        assert_eq!(gaussian_blur(&img, kernel(5)), gaussian_blur(&img, kernel(5)));
    }
}
