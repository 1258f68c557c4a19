//! Named stage outputs and the record that holds them.
//!
//! A [`PipelineState`] is built front to back: every stage slot is
//! filled only if all earlier slots are. [`PipelineState::phase`] reads
//! off how far it got. The orchestrator never edits a stored buffer; it
//! either replaces a slot (clearing everything after it) or swaps in a
//! whole new state.

use std::fmt;
use std::str::FromStr;

use image::{DynamicImage, GrayImage, RgbImage};

use crate::count::{self, DotCountResult};
use crate::params::{PipelineParams, ValidParams};
use crate::types::PipelineError;
use crate::{contrast, filter, illumination};

/// The six named stage outputs, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// The micrograph as loaded.
    Original,
    /// After illumination correction.
    Corrected,
    /// After the filter chain.
    Filtered,
    /// After contrast scaling.
    Contrast,
    /// The processed image with dot markers.
    DotsCounted,
    /// The original image with dot markers.
    OriginalWithDots,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Self; 6] = [
        Self::Original,
        Self::Corrected,
        Self::Filtered,
        Self::Contrast,
        Self::DotsCounted,
        Self::OriginalWithDots,
    ];

    /// The stage's external name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Corrected => "corrected",
            Self::Filtered => "filtered",
            Self::Contrast => "contrast",
            Self::DotsCounted => "dots_counted",
            Self::OriginalWithDots => "original_with_dots",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage name that is not one of [`Stage::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage `{0}`")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_owned()))
    }
}

/// Borrowed view of one stage output.
#[derive(Debug, Clone, Copy)]
pub enum StageImage<'a> {
    /// Single-channel intensity stage.
    Gray(&'a GrayImage),
    /// Three-channel annotated stage.
    Rgb(&'a RgbImage),
}

impl StageImage<'_> {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Gray(img) => img.width(),
            Self::Rgb(img) => img.width(),
        }
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        match self {
            Self::Gray(img) => img.height(),
            Self::Rgb(img) => img.height(),
        }
    }

    /// Owned copy as a [`DynamicImage`], e.g. for encoding to a file.
    #[must_use]
    pub fn to_dynamic(&self) -> DynamicImage {
        match self {
            Self::Gray(img) => DynamicImage::ImageLuma8((*img).clone()),
            Self::Rgb(img) => DynamicImage::ImageRgb8((*img).clone()),
        }
    }
}

/// How far the pipeline has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Nothing loaded.
    Empty,
    /// `original` is available.
    OriginalLoaded,
    /// `corrected` is available.
    Corrected,
    /// `filtered` is available.
    Filtered,
    /// `contrast` is available.
    ContrastAdjusted,
    /// Dots have been counted; every stage is available.
    Counted,
}

/// Every stage derived from one original image.
pub(crate) struct StageOutputs {
    pub corrected: GrayImage,
    pub filtered: GrayImage,
    pub contrast: GrayImage,
    pub dots: DotCountResult,
}

/// Correct, filter, scale and count `original` with validated parameters.
pub(crate) fn run_stages(original: &GrayImage, p: &ValidParams) -> StageOutputs {
    let corrected = illumination::correct_with(original, p.blur_kernel, p.brightness_offset);
    let filtered = filter::apply_valid(&corrected, p.filters);
    let contrast = contrast::scale(&filtered, p.alpha);
    let dots = count::count_valid(original, &contrast, p.min_area, p.connectivity);
    StageOutputs {
        corrected,
        filtered,
        contrast,
        dots,
    }
}

/// All stage outputs of one pipeline run.
///
/// Filling a slot through the `set_*` methods clears every later slot,
/// so a stored stage is always derived from the stages before it.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    original: Option<GrayImage>,
    corrected: Option<GrayImage>,
    filtered: Option<GrayImage>,
    contrast: Option<GrayImage>,
    dots: Option<DotCountResult>,
}

impl PipelineState {
    /// A state holding only the original image.
    #[must_use]
    pub fn loaded(original: GrayImage) -> Self {
        Self {
            original: Some(original),
            ..Self::default()
        }
    }

    /// Run every stage on `original` and keep all outputs.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] for the first invalid
    /// parameter. Parameters are checked before any pixel work.
    pub fn build(original: GrayImage, params: &PipelineParams) -> Result<Self, PipelineError> {
        let p = params.checked()?;
        let StageOutputs {
            corrected,
            filtered,
            contrast,
            dots,
        } = run_stages(&original, &p);
        Ok(Self::complete(original, corrected, filtered, contrast, dots))
    }

    pub(crate) fn complete(
        original: GrayImage,
        corrected: GrayImage,
        filtered: GrayImage,
        contrast: GrayImage,
        dots: DotCountResult,
    ) -> Self {
        Self {
            original: Some(original),
            corrected: Some(corrected),
            filtered: Some(filtered),
            contrast: Some(contrast),
            dots: Some(dots),
        }
    }

    /// Store the corrected image, dropping every later stage.
    pub(crate) fn set_corrected(&mut self, image: GrayImage) {
        self.corrected = Some(image);
        self.filtered = None;
        self.contrast = None;
        self.dots = None;
    }

    /// Store the filtered image, dropping every later stage.
    pub(crate) fn set_filtered(&mut self, image: GrayImage) {
        self.filtered = Some(image);
        self.contrast = None;
        self.dots = None;
    }

    /// Store the contrast-adjusted image, dropping the dot count.
    pub(crate) fn set_contrast(&mut self, image: GrayImage) {
        self.contrast = Some(image);
        self.dots = None;
    }

    /// Store the dot count.
    pub(crate) fn set_dots(&mut self, dots: DotCountResult) {
        self.dots = Some(dots);
    }

    /// How far this state has progressed.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        if self.dots.is_some() {
            Phase::Counted
        } else if self.contrast.is_some() {
            Phase::ContrastAdjusted
        } else if self.filtered.is_some() {
            Phase::Filtered
        } else if self.corrected.is_some() {
            Phase::Corrected
        } else if self.original.is_some() {
            Phase::OriginalLoaded
        } else {
            Phase::Empty
        }
    }

    /// The output of `stage`, if it has been produced.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<StageImage<'_>> {
        match stage {
            Stage::Original => self.original.as_ref().map(StageImage::Gray),
            Stage::Corrected => self.corrected.as_ref().map(StageImage::Gray),
            Stage::Filtered => self.filtered.as_ref().map(StageImage::Gray),
            Stage::Contrast => self.contrast.as_ref().map(StageImage::Gray),
            Stage::DotsCounted => self
                .dots
                .as_ref()
                .map(|d| StageImage::Rgb(d.annotated_processed())),
            Stage::OriginalWithDots => self
                .dots
                .as_ref()
                .map(|d| StageImage::Rgb(d.annotated_original())),
        }
    }

    /// A grayscale stage, if it has been produced.
    ///
    /// Always `None` for the annotated stages.
    #[must_use]
    pub fn gray(&self, stage: Stage) -> Option<&GrayImage> {
        match self.stage(stage)? {
            StageImage::Gray(img) => Some(img),
            StageImage::Rgb(_) => None,
        }
    }

    /// Stages that currently hold an output, in pipeline order.
    #[must_use]
    pub fn available(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|&s| self.stage(s).is_some())
            .collect()
    }

    /// The latest dot count, if counting has run.
    #[must_use]
    pub const fn dots(&self) -> Option<&DotCountResult> {
        self.dots.as_ref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
            assert_eq!(stage.to_string(), stage.as_str());
        }
    }

    #[test]
    fn unknown_stage_name_fails_to_parse() {
        let err = "edges".parse::<Stage>().unwrap_err();
        assert_eq!(err, UnknownStage("edges".to_owned()));
        assert_eq!(err.to_string(), "unknown stage `edges`");
    }

    #[test]
    fn default_state_is_empty() {
        let state = PipelineState::default();
        assert_eq!(state.phase(), Phase::Empty);
        assert!(state.available().is_empty());
        assert!(state.dots().is_none());
    }

    #[test]
    fn setting_a_stage_drops_later_ones() {
        let mut state = PipelineState::loaded(GrayImage::new(4, 4));
        state.set_corrected(GrayImage::new(4, 4));
        state.set_filtered(GrayImage::new(4, 4));
        state.set_contrast(GrayImage::new(4, 4));
        assert_eq!(state.phase(), Phase::ContrastAdjusted);

        state.set_corrected(GrayImage::new(4, 4));
        assert_eq!(state.phase(), Phase::Corrected);
        assert_eq!(state.available(), vec![Stage::Original, Stage::Corrected]);
    }

    fn dots_params() -> PipelineParams {
        PipelineParams {
            blur_kernel_size: 31,
            brightness_offset: 30,
            gaussian_blur: None,
            threshold: Some(200),
            morph_open: None,
            alpha: 1.0,
            size_threshold: 4,
            connectivity: 8,
        }
    }

    #[test]
    fn build_fills_every_stage() {
        let image = GrayImage::from_fn(40, 40, |x, y| {
            let on = (10..14).contains(&x) && (10..14).contains(&y);
            image::Luma([if on { 220 } else { 20 }])
        });
        let state = PipelineState::build(image, &dots_params()).unwrap();
        assert_eq!(state.phase(), Phase::Counted);
        assert_eq!(state.available(), Stage::ALL.to_vec());
        assert_eq!(state.dots().unwrap().count(), 1);
    }

    #[test]
    fn build_rejects_bad_params_before_work() {
        let params = PipelineParams {
            gaussian_blur: Some(4),
            ..dots_params()
        };
        let err = PipelineState::build(GrayImage::new(8, 8), &params).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidParameter {
                parameter: "gaussian_blur",
                ..
            }
        ));
    }

    #[test]
    fn gray_is_none_for_missing_stage() {
        let state = PipelineState::loaded(GrayImage::new(3, 2));
        assert_eq!(state.gray(Stage::Original).unwrap().dimensions(), (3, 2));
        assert!(state.gray(Stage::Filtered).is_none());
        assert!(state.gray(Stage::DotsCounted).is_none());
    }

    #[test]
    fn stage_image_dimensions_and_conversion() {
        let gray = GrayImage::new(5, 7);
        let view = StageImage::Gray(&gray);
        assert_eq!((view.width(), view.height()), (5, 7));
        assert!(matches!(view.to_dynamic(), DynamicImage::ImageLuma8(_)));

        let rgb = RgbImage::new(2, 3);
        let view = StageImage::Rgb(&rgb);
        assert_eq!((view.width(), view.height()), (2, 3));
        assert!(matches!(view.to_dynamic(), DynamicImage::ImageRgb8(_)));
    }
}
