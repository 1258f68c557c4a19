//! Blob detection: connected-component labeling with per-region stats.
//!
//! The input is always re-binarized at [`FOREGROUND_LEVEL`] so that
//! callers can hand in an unthresholded image. Labeling is delegated to
//! [`imageproc::region_labelling::connected_components`]; this module
//! only turns the label map into [`Blob`]s.
//!
//! Label numbers are whatever the labeling pass hands out. They are
//! unique and never 0, but callers should not rely on any particular
//! scan order.

use image::{GrayImage, ImageBuffer, Luma};

use crate::params::Connectivity;
use crate::types::{Blob, BoundingBox, Point};

/// Pixels strictly brighter than this are foreground.
pub const FOREGROUND_LEVEL: u8 = 127;

/// Map of per-pixel labels (0 = background).
pub type LabelMap = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Strict 0/255 mask: 255 where the pixel is above [`FOREGROUND_LEVEL`].
#[must_use = "returns the binary mask"]
pub fn binarize(image: &GrayImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y).0[0] > FOREGROUND_LEVEL {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Label the connected foreground regions of `image`.
#[must_use = "returns the label map"]
pub fn label(image: &GrayImage, connectivity: Connectivity) -> LabelMap {
    let mask = binarize(image);
    imageproc::region_labelling::connected_components(&mask, connectivity.into(), Luma([0u8]))
}

/// Find every connected foreground region in `image`.
///
/// Returns one [`Blob`] per region in ascending label order. An image
/// without foreground yields an empty vector.
#[must_use]
pub fn detect(image: &GrayImage, connectivity: Connectivity) -> Vec<Blob> {
    let blobs = blobs_from_labels(&label(image, connectivity));
    tracing::debug!(
        connectivity = connectivity.neighbours(),
        blobs = blobs.len(),
        "labeled blobs",
    );
    blobs
}

/// Running sums for one label.
#[derive(Debug, Clone, Copy)]
struct RegionStats {
    area: u64,
    sum_x: u64,
    sum_y: u64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl RegionStats {
    const EMPTY: Self = Self {
        area: 0,
        sum_x: 0,
        sum_y: 0,
        min_x: u32::MAX,
        min_y: u32::MAX,
        max_x: 0,
        max_y: 0,
    };

    fn add(&mut self, x: u32, y: u32) {
        self.area += 1;
        self.sum_x += u64::from(x);
        self.sum_y += u64::from(y);
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    #[allow(clippy::cast_precision_loss)]
    fn into_blob(self, label: u32) -> Blob {
        let area = self.area as f64;
        Blob {
            label,
            area: self.area,
            centroid: Point::new(self.sum_x as f64 / area, self.sum_y as f64 / area),
            bounding_box: BoundingBox {
                left: self.min_x,
                top: self.min_y,
                width: self.max_x - self.min_x + 1,
                height: self.max_y - self.min_y + 1,
            },
        }
    }
}

/// Accumulate area, centroid and bounding box for every non-zero label.
fn blobs_from_labels(labels: &LabelMap) -> Vec<Blob> {
    let max_label = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0);
    if max_label == 0 {
        return Vec::new();
    }

    let mut stats = vec![RegionStats::EMPTY; max_label as usize + 1];
    for (x, y, p) in labels.enumerate_pixels() {
        let l = p.0[0];
        if l != 0 {
            stats[l as usize].add(x, y);
        }
    }

    stats
        .into_iter()
        .zip(0u32..)
        .skip(1)
        .filter(|(s, _)| s.area > 0)
        .map(|(s, l)| s.into_blob(l))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_pixels(w: u32, h: u32, on: &[(u32, u32)]) -> GrayImage {
        let mut image = GrayImage::new(w, h);
        for &(x, y) in on {
            image.put_pixel(x, y, Luma([255]));
        }
        image
    }

    #[test]
    fn binarize_is_strictly_above_127() {
        let image = GrayImage::from_fn(3, 1, |x, _| Luma([[127, 128, 255][x as usize]]));
        let mask = binarize(&image);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(1, 0).0[0], 255);
        assert_eq!(mask.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn empty_image_has_no_blobs() {
        let image = GrayImage::new(10, 10);
        assert!(detect(&image, Connectivity::Eight).is_empty());
        assert!(detect(&image, Connectivity::Four).is_empty());
    }

    #[test]
    fn zero_sized_image_has_no_blobs() {
        assert!(detect(&GrayImage::new(0, 0), Connectivity::Four).is_empty());
    }

    #[test]
    fn diagonal_pixels_merge_only_with_eight_connectivity() {
        let image = with_pixels(4, 4, &[(1, 1), (2, 2)]);
        assert_eq!(detect(&image, Connectivity::Eight).len(), 1);
        assert_eq!(detect(&image, Connectivity::Four).len(), 2);
    }

    #[test]
    fn square_stats() {
        let image = GrayImage::from_fn(20, 20, |x, y| {
            Luma([if (3..8).contains(&x) && (10..13).contains(&y) { 255 } else { 0 }])
        });
        let blobs = detect(&image, Connectivity::Four);
        assert_eq!(blobs.len(), 1);
        let blob = &blobs[0];
        assert_ne!(blob.label, 0);
        assert_eq!(blob.area, 15);
        assert!((blob.centroid.x - 5.0).abs() < 1e-9);
        assert!((blob.centroid.y - 11.0).abs() < 1e-9);
        assert_eq!(
            blob.bounding_box,
            BoundingBox {
                left: 3,
                top: 10,
                width: 5,
                height: 3,
            }
        );
    }

    #[test]
    fn l_shape_centroid_is_mean_of_pixels() {
        let image = with_pixels(5, 5, &[(0, 0), (0, 1), (0, 2), (1, 2), (2, 2)]);
        let blobs = detect(&image, Connectivity::Four);
        assert_eq!(blobs.len(), 1);
        assert!((blobs[0].centroid.x - 0.6).abs() < 1e-9);
        assert!((blobs[0].centroid.y - 1.4).abs() < 1e-9);
    }

    #[test]
    fn gray_input_is_rebinarized() {
        // A dim region below the foreground level is background even
        // though it is non-zero.
        let image = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 5 { 100 } else { 200 }]));
        let blobs = detect(&image, Connectivity::Eight);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 50);
        assert_eq!(blobs[0].bounding_box.left, 5);
    }

    #[test]
    fn labels_are_unique_and_non_zero() {
        let image = with_pixels(9, 9, &[(0, 0), (4, 4), (8, 8), (0, 8), (8, 0)]);
        let blobs = detect(&image, Connectivity::Eight);
        assert_eq!(blobs.len(), 5);
        let mut labels: Vec<u32> = blobs.iter().map(|b| b.label).collect();
        assert!(labels.iter().all(|&l| l != 0));
        labels.dedup();
        assert_eq!(labels.len(), 5);
        assert!(blobs.windows(2).all(|w| w[0].label < w[1].label));
    }

    #[test]
    fn centroids_lie_within_bounds() {
        let image = with_pixels(6, 4, &[(0, 0), (5, 3), (5, 0), (0, 3)]);
        for blob in detect(&image, Connectivity::Four) {
            assert!(blob.centroid.x >= 0.0 && blob.centroid.x < 6.0);
            assert!(blob.centroid.y >= 0.0 && blob.centroid.y < 4.0);
        }
    }
}
