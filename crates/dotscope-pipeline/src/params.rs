//! Tuning parameters for each pipeline stage.
//!
//! [`PipelineParams`] is the flat parameter surface a front end fills in
//! (one field per knob). The stage functions take the narrower views
//! ([`FilterParameters`], ...) or plain numbers, and validate them before
//! touching any pixels.
//!
//! Kernel sizes and connectivity get validated newtypes ([`KernelSize`],
//! [`Connectivity`]) so that once a value has been checked it cannot be
//! confused with an unchecked one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// An odd, positive square-kernel edge length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KernelSize(u32);

impl KernelSize {
    /// Validate a kernel size for the parameter called `parameter`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if `size` is zero or even.
    pub fn new(parameter: &'static str, size: u32) -> Result<Self, PipelineError> {
        if size == 0 {
            return Err(PipelineError::invalid(
                parameter,
                "kernel size must be at least 1",
            ));
        }
        if size % 2 == 0 {
            return Err(PipelineError::invalid(
                parameter,
                format!("kernel size must be odd, got {size}"),
            ));
        }
        Ok(Self(size))
    }

    /// The full edge length.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Half-width of the kernel: `(size - 1) / 2`.
    #[must_use]
    pub const fn radius(self) -> u32 {
        self.0 / 2
    }
}

impl fmt::Display for KernelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{0}x{0}", self.0)
    }
}

/// Pixel adjacency rule used when merging foreground pixels into blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connectivity {
    /// Edge-sharing neighbours only.
    Four,
    /// Edge- or corner-sharing neighbours.
    Eight,
}

impl Connectivity {
    /// The neighbour count this rule is named after.
    #[must_use]
    pub const fn neighbours(self) -> u8 {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u8> for Connectivity {
    type Error = PipelineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(PipelineError::invalid(
                "connectivity",
                format!("must be 4 or 8, got {other}"),
            )),
        }
    }
}

impl From<Connectivity> for imageproc::region_labelling::Connectivity {
    fn from(value: Connectivity) -> Self {
        match value {
            Connectivity::Four => Self::Four,
            Connectivity::Eight => Self::Eight,
        }
    }
}

/// Brightness added after illumination correction when the caller does
/// not supply one.
pub const DEFAULT_BRIGHTNESS_OFFSET: i32 = 30;

const fn default_brightness_offset() -> i32 {
    DEFAULT_BRIGHTNESS_OFFSET
}

/// Every tunable knob of a full pipeline run, as one flat record.
///
/// Apart from `brightness_offset` (which falls back to
/// [`DEFAULT_BRIGHTNESS_OFFSET`]) nothing has a default: the filter
/// options are `Option`s where `None` means "skip this filter", and the
/// remaining fields must be given explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineParams {
    /// Background-estimation blur kernel size (odd, >= 1).
    pub blur_kernel_size: u32,
    /// Added to every pixel after correction and normalization.
    #[serde(default = "default_brightness_offset")]
    pub brightness_offset: i32,
    /// Denoising blur kernel size (odd, >= 1), or `None` to skip.
    pub gaussian_blur: Option<u32>,
    /// Binarization level in `[0, 255]`, or `None` to skip.
    pub threshold: Option<i32>,
    /// Opening structuring-element size (odd, >= 1), or `None` to skip.
    pub morph_open: Option<u32>,
    /// Contrast scale factor (> 0).
    pub alpha: f64,
    /// Minimum blob area in pixels for a blob to count as a dot.
    pub size_threshold: i64,
    /// 4 or 8.
    pub connectivity: u8,
}

impl PipelineParams {
    /// Illumination-correction view of these parameters.
    #[must_use]
    pub const fn illumination(&self) -> IlluminationParameters {
        IlluminationParameters {
            blur_kernel_size: self.blur_kernel_size,
            brightness_offset: self.brightness_offset,
        }
    }

    /// Filter-chain view of these parameters.
    #[must_use]
    pub const fn filter(&self) -> FilterParameters {
        FilterParameters {
            gaussian_blur: self.gaussian_blur,
            threshold: self.threshold,
            morph_open: self.morph_open,
        }
    }

    /// Contrast view of these parameters.
    #[must_use]
    pub const fn contrast(&self) -> ContrastParameters {
        ContrastParameters { alpha: self.alpha }
    }

    /// Dot-counting view of these parameters.
    #[must_use]
    pub const fn counting(&self) -> CountParameters {
        CountParameters {
            size_threshold: self.size_threshold,
            connectivity: self.connectivity,
        }
    }

    /// Check every parameter without doing any pixel work.
    ///
    /// # Errors
    ///
    /// Returns the first [`PipelineError::InvalidParameter`] found, in
    /// pipeline order.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.checked().map(|_| ())
    }

    pub(crate) fn checked(&self) -> Result<ValidParams, PipelineError> {
        let blur_kernel = self.illumination().validate()?;
        let filters = self.filter().validate()?;
        let alpha = self.contrast().validate()?;
        let (min_area, connectivity) = self.counting().validate()?;
        Ok(ValidParams {
            blur_kernel,
            brightness_offset: self.brightness_offset,
            filters,
            alpha,
            min_area,
            connectivity,
        })
    }
}

/// [`PipelineParams`] after validation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValidParams {
    pub blur_kernel: KernelSize,
    pub brightness_offset: i32,
    pub filters: ValidFilters,
    pub alpha: f64,
    pub min_area: u64,
    pub connectivity: Connectivity,
}

/// Parameters of the illumination-correction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IlluminationParameters {
    /// Background-estimation blur kernel size.
    pub blur_kernel_size: u32,
    /// Added to every pixel after correction.
    pub brightness_offset: i32,
}

impl IlluminationParameters {
    /// Parameters with the default brightness offset.
    #[must_use]
    pub const fn new(blur_kernel_size: u32) -> Self {
        Self {
            blur_kernel_size,
            brightness_offset: DEFAULT_BRIGHTNESS_OFFSET,
        }
    }

    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] for a zero or even
    /// kernel size.
    pub fn validate(&self) -> Result<KernelSize, PipelineError> {
        KernelSize::new("blur_kernel_size", self.blur_kernel_size)
    }
}

/// Largest accepted `morph_open` element: a radius of 255.
pub const MAX_MORPH_OPEN: u32 = 511;

/// Parameters of the filter chain. The default skips every filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParameters {
    /// Gaussian blur kernel size.
    pub gaussian_blur: Option<u32>,
    /// Binary threshold level.
    pub threshold: Option<i32>,
    /// Morphological opening element size.
    pub morph_open: Option<u32>,
}

/// [`FilterParameters`] after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidFilters {
    /// Gaussian blur kernel size.
    pub gaussian_blur: Option<KernelSize>,
    /// Binary threshold level.
    pub threshold: Option<u8>,
    /// Morphological opening element size.
    pub morph_open: Option<KernelSize>,
}

impl FilterParameters {
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] for a zero or even
    /// kernel size, a threshold outside `[0, 255]` or an opening element
    /// larger than [`MAX_MORPH_OPEN`].
    pub fn validate(&self) -> Result<ValidFilters, PipelineError> {
        let gaussian_blur = self
            .gaussian_blur
            .map(|k| KernelSize::new("gaussian_blur", k))
            .transpose()?;
        let threshold = self
            .threshold
            .map(|t| {
                u8::try_from(t).map_err(|_| {
                    PipelineError::invalid("threshold", format!("must be in [0, 255], got {t}"))
                })
            })
            .transpose()?;
        let morph_open = self
            .morph_open
            .map(|k| {
                if k > MAX_MORPH_OPEN {
                    return Err(PipelineError::invalid(
                        "morph_open",
                        format!("kernel size must be at most {MAX_MORPH_OPEN}, got {k}"),
                    ));
                }
                KernelSize::new("morph_open", k)
            })
            .transpose()?;
        Ok(ValidFilters {
            gaussian_blur,
            threshold,
            morph_open,
        })
    }
}

/// Parameters of the contrast stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContrastParameters {
    /// Scale factor; 1.0 leaves the image unchanged.
    pub alpha: f64,
}

impl ContrastParameters {
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] unless `alpha` is a
    /// finite number greater than zero.
    pub fn validate(&self) -> Result<f64, PipelineError> {
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(PipelineError::invalid(
                "alpha",
                format!("must be a finite number > 0, got {}", self.alpha),
            ));
        }
        Ok(self.alpha)
    }
}

/// Parameters of the dot-counting stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountParameters {
    /// Minimum accepted blob area (inclusive).
    pub size_threshold: i64,
    /// 4 or 8.
    pub connectivity: u8,
}

impl CountParameters {
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] for a negative size
    /// threshold or a connectivity other than 4 or 8.
    pub fn validate(&self) -> Result<(u64, Connectivity), PipelineError> {
        let size_threshold = u64::try_from(self.size_threshold).map_err(|_| {
            PipelineError::invalid(
                "size_threshold",
                format!("must be >= 0, got {}", self.size_threshold),
            )
        })?;
        let connectivity = Connectivity::try_from(self.connectivity)?;
        Ok((size_threshold, connectivity))
    }
}
