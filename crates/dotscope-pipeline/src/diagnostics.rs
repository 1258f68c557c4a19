//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation for parameter
//! tuning. [`run_with_diagnostics`] runs the full pipeline exactly like
//! [`PipelineState::build`] and additionally records how long each stage
//! took and what it produced.
//!
//! Timestamps come from a caller-supplied [`Clock`], so the core crate
//! never reads the system time itself.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::path::Path;
use std::time::Duration;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::count::{self, DotCountResult};
use crate::illumination::{self, intensity_range};
use crate::params::PipelineParams;
use crate::state::PipelineState;
use crate::types::{Dimensions, PipelineError};
use crate::{blob, contrast, filter, grayscale};

/// Source of timestamps for stage durations.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
///
/// `load` is only present when the run started from a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Reading and decoding the input file.
    pub load: Option<StageDiagnostics>,
    /// Illumination correction.
    pub correct: StageDiagnostics,
    /// Blur, threshold and opening.
    pub filter: StageDiagnostics,
    /// Contrast scaling.
    pub contrast: StageDiagnostics,
    /// Blob labeling, size filtering and annotation.
    pub count: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image loading metrics.
    Load {
        /// Where the image came from.
        origin: String,
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Total pixel count (`width * height`).
        pixel_count: u64,
    },
    /// Illumination correction metrics.
    Correct {
        /// Background blur kernel size.
        blur_kernel_size: u32,
        /// Offset added after normalization.
        brightness_offset: i32,
        /// Darkest pixel of the corrected image.
        min_intensity: u8,
        /// Brightest pixel of the corrected image.
        max_intensity: u8,
    },
    /// Filter chain metrics.
    Filter {
        /// Gaussian blur kernel size, if the blur ran.
        gaussian_blur: Option<u32>,
        /// Threshold level, if thresholding ran.
        threshold: Option<u8>,
        /// Opening element size, if opening ran.
        morph_open: Option<u32>,
        /// Pixels above the blob foreground level after filtering.
        foreground_pixel_count: u64,
        /// Total pixel count for computing foreground density.
        total_pixel_count: u64,
    },
    /// Contrast metrics.
    Contrast {
        /// Scale factor.
        alpha: f64,
        /// Pixels clipped at 255.
        saturated_pixel_count: u64,
    },
    /// Dot counting metrics.
    Count {
        /// 4 or 8.
        connectivity: u8,
        /// Minimum accepted area.
        size_threshold: u64,
        /// Blobs found before size filtering.
        blob_count: usize,
        /// Blobs accepted as dots.
        dot_count: usize,
        /// Blobs rejected as too small.
        rejected_count: usize,
        /// Smallest accepted dot area, 0 without dots.
        min_dot_area: u64,
        /// Largest accepted dot area, 0 without dots.
        max_dot_area: u64,
    },
}

/// High-level summary for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Number of dots counted.
    pub dot_count: usize,
}

impl PipelineDiagnostics {
    /// Stage name and diagnostics, in execution order.
    #[must_use]
    pub fn stages(&self) -> Vec<(&'static str, &StageDiagnostics)> {
        let mut stages = Vec::with_capacity(5);
        if let Some(ref load) = self.load {
            stages.push(("Load", load));
        }
        stages.push(("Illumination", &self.correct));
        stages.push(("Filter", &self.filter));
        stages.push(("Contrast", &self.contrast));
        stages.push(("Count", &self.count));
        stages
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!("Dots: {}", self.summary.dot_count));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn optional(size: Option<impl std::fmt::Display>) -> String {
    size.map_or_else(|| "off".to_owned(), |s| s.to_string())
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Load {
            origin,
            width,
            height,
            ..
        } => format!("{origin} -> {width}x{height}"),
        StageMetrics::Correct {
            blur_kernel_size,
            brightness_offset,
            min_intensity,
            max_intensity,
        } => format!(
            "k={blur_kernel_size} offset={brightness_offset:+} range=[{min_intensity}, {max_intensity}]",
        ),
        StageMetrics::Filter {
            gaussian_blur,
            threshold,
            morph_open,
            foreground_pixel_count,
            total_pixel_count,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *total_pixel_count > 0 {
                *foreground_pixel_count as f64 / *total_pixel_count as f64 * 100.0
            } else {
                0.0
            };
            format!(
                "blur={} threshold={} open={} fg={foreground_pixel_count} ({density:.1}%)",
                optional(*gaussian_blur),
                optional(*threshold),
                optional(*morph_open),
            )
        }
        StageMetrics::Contrast {
            alpha,
            saturated_pixel_count,
        } => format!("alpha={alpha:.2} saturated={saturated_pixel_count}"),
        StageMetrics::Count {
            connectivity,
            size_threshold,
            blob_count,
            dot_count,
            rejected_count,
            min_dot_area,
            max_dot_area,
        } => format!(
            "conn={connectivity} min_area={size_threshold} blobs={blob_count} dots={dot_count} rejected={rejected_count} area=[{min_dot_area}, {max_dot_area}]",
        ),
    }
}

/// Pixels a later blob detection would treat as foreground.
fn foreground_pixels(image: &GrayImage) -> u64 {
    image
        .pixels()
        .map(|p| u64::from(p.0[0] > blob::FOREGROUND_LEVEL))
        .sum()
}

/// Run every stage on `original`, timing each one.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] for the first invalid
/// parameter, before any stage runs.
pub fn run_with_diagnostics<C: Clock>(
    original: GrayImage,
    params: &PipelineParams,
    clock: &C,
) -> Result<(PipelineState, PipelineDiagnostics), PipelineError> {
    let start = clock.now();
    run_timed(original, None, params, clock, &start)
}

/// Load `path` and run every stage on it, timing each one.
///
/// Parameters are validated before the file is read.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] for an invalid parameter
/// or [`PipelineError::ImageLoad`] if the file cannot be read or decoded.
pub fn run_path_with_diagnostics<C: Clock>(
    path: impl AsRef<Path>,
    params: &PipelineParams,
    clock: &C,
) -> Result<(PipelineState, PipelineDiagnostics), PipelineError> {
    let path = path.as_ref();
    params.validate()?;

    let start = clock.now();
    let original = grayscale::load_image(path)?;
    let dims = Dimensions::of(&original);
    let load = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Load {
            origin: path.display().to_string(),
            width: dims.width,
            height: dims.height,
            pixel_count: dims.pixel_count(),
        },
    };
    run_timed(original, Some(load), params, clock, &start)
}

fn run_timed<C: Clock>(
    original: GrayImage,
    load: Option<StageDiagnostics>,
    params: &PipelineParams,
    clock: &C,
    start: &C::Instant,
) -> Result<(PipelineState, PipelineDiagnostics), PipelineError> {
    let p = params.checked()?;
    let dims = Dimensions::of(&original);

    let t = clock.now();
    let corrected = illumination::correct_with(&original, p.blur_kernel, p.brightness_offset);
    let (min_intensity, max_intensity) = intensity_range(&corrected).unwrap_or((0, 0));
    let correct = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Correct {
            blur_kernel_size: p.blur_kernel.get(),
            brightness_offset: p.brightness_offset,
            min_intensity,
            max_intensity,
        },
    };

    let t = clock.now();
    let filtered = filter::apply_valid(&corrected, p.filters);
    let filter = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Filter {
            gaussian_blur: p.filters.gaussian_blur.map(|k| k.get()),
            threshold: p.filters.threshold,
            morph_open: p.filters.morph_open.map(|k| k.get()),
            foreground_pixel_count: foreground_pixels(&filtered),
            total_pixel_count: dims.pixel_count(),
        },
    };

    let t = clock.now();
    let adjusted = contrast::scale(&filtered, p.alpha);
    let contrast = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: StageMetrics::Contrast {
            alpha: p.alpha,
            saturated_pixel_count: contrast::saturated_count(&filtered, p.alpha),
        },
    };

    let t = clock.now();
    let dots = count::count_valid(&original, &adjusted, p.min_area, p.connectivity);
    let count = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: count_metrics(&dots, p.connectivity.neighbours(), p.min_area),
    };

    let diagnostics = PipelineDiagnostics {
        load,
        correct,
        filter,
        contrast,
        count,
        total_duration: clock.elapsed(start),
        summary: PipelineSummary {
            image_width: dims.width,
            image_height: dims.height,
            pixel_count: dims.pixel_count(),
            dot_count: dots.count(),
        },
    };
    let state = PipelineState::complete(original, corrected, filtered, adjusted, dots);
    Ok((state, diagnostics))
}

fn count_metrics(dots: &DotCountResult, connectivity: u8, size_threshold: u64) -> StageMetrics {
    let areas = dots.dots().iter().map(|d| d.area);
    StageMetrics::Count {
        connectivity,
        size_threshold,
        blob_count: dots.count() + dots.rejected(),
        dot_count: dots.count(),
        rejected_count: dots.rejected(),
        min_dot_area: areas.clone().min().unwrap_or(0),
        max_dot_area: areas.max().unwrap_or(0),
    }
}
