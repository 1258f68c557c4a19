//! Shared types for the dotscope analysis pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference stage
/// buffers without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference the
/// annotated outputs without depending on `image` directly.
pub use image::RgbImage;

/// A 2D point in image coordinates.
///
/// Pixel centres sit at integer coordinates, so the centroid of a
/// single pixel at column 3, row 7 is `(3.0, 7.0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Nearest integer pixel, or `None` if either coordinate is not finite.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_pixel(self) -> Option<(i32, i32)> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return None;
        }
        Some((self.x.round() as i32, self.y.round() as i32))
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of a grayscale buffer.
    #[must_use]
    pub fn of(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total pixel count.
    #[must_use]
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether `p` lies inside `[0, width) x [0, height)`.
    #[must_use]
    pub fn contains(self, p: Point) -> bool {
        p.x >= 0.0 && p.y >= 0.0 && p.x < f64::from(self.width) && p.y < f64::from(self.height)
    }
}

/// Axis-aligned pixel extent of a blob.
///
/// `left`/`top` are the smallest column/row touched; `width`/`height`
/// count pixels, so a single pixel has a 1x1 box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Leftmost column.
    pub left: u32,
    /// Topmost row.
    pub top: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// One connected region of foreground pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    /// Label assigned by the labeling pass. Never 0 (reserved for
    /// background).
    pub label: u32,
    /// Number of pixels in the region.
    pub area: u64,
    /// Mean pixel position of the region.
    pub centroid: Point,
    /// Pixel extent of the region.
    pub bounding_box: BoundingBox,
}

/// Errors that can occur while loading or analysing an image.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The image could not be read or decoded.
    #[error("failed to load image from {origin}: {reason}")]
    ImageLoad {
        /// Where the image came from (a path, or `<memory>`).
        origin: String,
        /// Why loading failed.
        reason: String,
    },

    /// A numeric parameter violates its documented constraint.
    #[error("invalid parameter `{parameter}`: {reason}")]
    InvalidParameter {
        /// Name of the offending parameter, as it appears in
        /// [`PipelineParams`](crate::PipelineParams).
        parameter: &'static str,
        /// Human-readable description of the constraint.
        reason: String,
    },

    /// A step was invoked before the stage it consumes was produced.
    #[error("cannot {requested}: stage `{missing}` has not been produced")]
    StageNotReady {
        /// The step that was attempted.
        requested: &'static str,
        /// The stage the step needs as input.
        missing: crate::Stage,
    },
}

impl PipelineError {
    /// Shorthand for [`PipelineError::InvalidParameter`].
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }
}
