//! Stateful orchestration: run stages one at a time or all at once, and
//! look up any intermediate result by name.
//!
//! ```rust
//! # use dotscope_pipeline::{
//! #     FilterParameters, GrayImage, IlluminationParameters, Orchestrator, PipelineError,
//! # };
//! # fn run(image: GrayImage) -> Result<(), PipelineError> {
//! let mut pipeline = Orchestrator::new();
//! pipeline.load_image(image);
//! pipeline.correct_illumination(&IlluminationParameters::new(101))?;
//! pipeline.apply_filters(&FilterParameters {
//!     gaussian_blur: Some(5),
//!     threshold: Some(127),
//!     morph_open: Some(3),
//! })?;
//! pipeline.adjust_contrast(1.5)?;
//! let _dots = pipeline.count_dots(25, 8)?.count();
//! # Ok(())
//! # }
//! ```
//!
//! Each step reads the stage before it and replaces its own stage,
//! dropping everything downstream. Re-running an early step therefore
//! never leaves later outputs computed from other parameters in place.
//! A step that fails leaves the state exactly as it was.

use std::path::Path;

use image::GrayImage;

use crate::count::{self, DotCountResult};
use crate::diagnostics::{self, Clock, PipelineDiagnostics};
use crate::params::{
    ContrastParameters, CountParameters, FilterParameters, IlluminationParameters, PipelineParams,
};
use crate::state::{Phase, PipelineState, Stage, StageImage};
use crate::types::{PipelineError, Point};
use crate::{contrast, filter, grayscale, illumination};

/// Owner of one [`PipelineState`].
///
/// Not shareable across threads while a step runs (`&mut self`);
/// independent orchestrators can run in parallel.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    state: PipelineState,
}

impl Orchestrator {
    /// An orchestrator with nothing loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every stage.
    pub fn clear(&mut self) {
        self.state = PipelineState::default();
    }

    /// How far the pipeline has progressed.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// The full stage record.
    #[must_use]
    pub const fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Start over from `image`, dropping every previous stage.
    pub fn load_image(&mut self, image: GrayImage) {
        tracing::debug!(width = image.width(), height = image.height(), "loaded image");
        self.state = PipelineState::loaded(image);
    }

    /// Read and decode `path`, then start over from it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ImageLoad`] if the file cannot be read or
    /// decoded. The previous state is kept in that case.
    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        let image = grayscale::load_image(path)?;
        self.load_image(image);
        Ok(())
    }

    /// Produce `corrected` from `original`.
    ///
    /// [`IlluminationParameters::new`] fills in the default brightness
    /// offset.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidParameter`] for a zero or even kernel
    /// size, [`PipelineError::StageNotReady`] if no image is loaded.
    pub fn correct_illumination(
        &mut self,
        params: &IlluminationParameters,
    ) -> Result<&GrayImage, PipelineError> {
        let kernel = params.validate()?;
        let original = self.require("correct illumination", Stage::Original)?;
        let corrected = illumination::correct_with(original, kernel, params.brightness_offset);
        self.state.set_corrected(corrected);
        self.produced(Stage::Corrected)
    }

    /// Produce `filtered` from `corrected`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidParameter`] for a bad filter setting,
    /// [`PipelineError::StageNotReady`] if illumination has not been
    /// corrected yet.
    pub fn apply_filters(
        &mut self,
        params: &FilterParameters,
    ) -> Result<&GrayImage, PipelineError> {
        let filters = params.validate()?;
        let corrected = self.require("apply filters", Stage::Corrected)?;
        let filtered = filter::apply_valid(corrected, filters);
        self.state.set_filtered(filtered);
        self.produced(Stage::Filtered)
    }

    /// Produce `contrast` from `filtered`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidParameter`] unless `alpha` is finite and
    /// positive, [`PipelineError::StageNotReady`] if filters have not
    /// been applied yet.
    pub fn adjust_contrast(&mut self, alpha: f64) -> Result<&GrayImage, PipelineError> {
        let alpha = ContrastParameters { alpha }.validate()?;
        let filtered = self.require("adjust contrast", Stage::Filtered)?;
        let adjusted = contrast::scale(filtered, alpha);
        self.state.set_contrast(adjusted);
        self.produced(Stage::Contrast)
    }

    /// Count dots on `contrast` and annotate it and `original`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidParameter`] for a negative size threshold
    /// or a connectivity other than 4 or 8,
    /// [`PipelineError::StageNotReady`] if contrast has not been adjusted
    /// yet.
    pub fn count_dots(
        &mut self,
        size_threshold: i64,
        connectivity: u8,
    ) -> Result<&DotCountResult, PipelineError> {
        let (min_area, connectivity) = CountParameters {
            size_threshold,
            connectivity,
        }
        .validate()?;
        let original = self.require("count dots", Stage::Original)?;
        let processed = self.require("count dots", Stage::Contrast)?;
        let dots = count::count_valid(original, processed, min_area, connectivity);
        self.state.set_dots(dots);
        self.state.dots().ok_or(PipelineError::StageNotReady {
            requested: "count dots",
            missing: Stage::DotsCounted,
        })
    }

    /// Run every stage on `original` with `params`.
    ///
    /// The new state replaces the current one only if the whole run
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] for the first invalid
    /// parameter; nothing is computed in that case.
    pub fn run_pipeline(
        &mut self,
        original: GrayImage,
        params: &PipelineParams,
    ) -> Result<&DotCountResult, PipelineError> {
        let state = PipelineState::build(original, params).inspect_err(abort)?;
        self.commit(state)
    }

    /// Load `path` and run every stage on it.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InvalidParameter`] or [`PipelineError::ImageLoad`].
    /// The current state is kept on failure.
    pub fn run_pipeline_path(
        &mut self,
        path: impl AsRef<Path>,
        params: &PipelineParams,
    ) -> Result<&DotCountResult, PipelineError> {
        params.validate().inspect_err(abort)?;
        let original = grayscale::load_image(path).inspect_err(abort)?;
        self.run_pipeline(original, params)
    }

    /// [`run_pipeline`](Self::run_pipeline) with per-stage timing.
    ///
    /// # Errors
    ///
    /// Same as [`run_pipeline`](Self::run_pipeline).
    pub fn run_pipeline_with_diagnostics<C: Clock>(
        &mut self,
        original: GrayImage,
        params: &PipelineParams,
        clock: &C,
    ) -> Result<PipelineDiagnostics, PipelineError> {
        let (state, diag) =
            diagnostics::run_with_diagnostics(original, params, clock).inspect_err(abort)?;
        self.state = state;
        Ok(diag)
    }

    /// [`run_pipeline_path`](Self::run_pipeline_path) with per-stage
    /// timing, including the load.
    ///
    /// # Errors
    ///
    /// Same as [`run_pipeline_path`](Self::run_pipeline_path).
    pub fn run_pipeline_path_with_diagnostics<C: Clock>(
        &mut self,
        path: impl AsRef<Path>,
        params: &PipelineParams,
        clock: &C,
    ) -> Result<PipelineDiagnostics, PipelineError> {
        let (state, diag) =
            diagnostics::run_path_with_diagnostics(path, params, clock).inspect_err(abort)?;
        self.state = state;
        Ok(diag)
    }

    /// Look up a stage output by its external name.
    ///
    /// Unknown names and stages not yet produced both give `None`.
    #[must_use]
    pub fn get_stage_output(&self, name: &str) -> Option<StageImage<'_>> {
        self.stage(name.parse().ok()?)
    }

    /// Typed stage lookup.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<StageImage<'_>> {
        self.state.stage(stage)
    }

    /// Latest counting result.
    #[must_use]
    pub const fn result(&self) -> Option<&DotCountResult> {
        self.state.dots()
    }

    /// Latest dot count.
    #[must_use]
    pub fn dot_count(&self) -> Option<usize> {
        self.result().map(DotCountResult::count)
    }

    /// Latest centroids.
    #[must_use]
    pub fn centroids(&self) -> Option<&[Point]> {
        self.result().map(DotCountResult::centroids)
    }

    fn require(&self, requested: &'static str, stage: Stage) -> Result<&GrayImage, PipelineError> {
        self.state.gray(stage).ok_or(PipelineError::StageNotReady {
            requested,
            missing: stage,
        })
    }

    fn produced(&self, stage: Stage) -> Result<&GrayImage, PipelineError> {
        self.state.gray(stage).ok_or(PipelineError::StageNotReady {
            requested: "read stage",
            missing: stage,
        })
    }

    fn commit(&mut self, state: PipelineState) -> Result<&DotCountResult, PipelineError> {
        self.state = state;
        self.state.dots().ok_or(PipelineError::StageNotReady {
            requested: "run pipeline",
            missing: Stage::DotsCounted,
        })
    }
}

fn abort(err: &PipelineError) {
    tracing::warn!(%err, "pipeline run aborted");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn two_squares() -> GrayImage {
        GrayImage::from_fn(50, 50, |x, y| {
            let on = [(8u32, 8u32), (30, 30)]
                .iter()
                .any(|&(l, t)| (l..l + 5).contains(&x) && (t..t + 5).contains(&y));
            image::Luma([if on { 240 } else { 30 }])
        })
    }

    fn params() -> PipelineParams {
        PipelineParams {
            blur_kernel_size: 31,
            brightness_offset: 30,
            gaussian_blur: None,
            threshold: Some(200),
            morph_open: None,
            alpha: 1.0,
            size_threshold: 20,
            connectivity: 8,
        }
    }

    fn filters() -> FilterParameters {
        params().filter()
    }

    fn illumination(blur_kernel_size: u32, brightness_offset: i32) -> IlluminationParameters {
        IlluminationParameters {
            blur_kernel_size,
            brightness_offset,
        }
    }

    #[test]
    fn new_orchestrator_is_empty() {
        let pipeline = Orchestrator::new();
        assert_eq!(pipeline.phase(), Phase::Empty);
        assert!(pipeline.result().is_none());
        for stage in Stage::ALL {
            assert!(pipeline.stage(stage).is_none());
        }
    }

    #[test]
    fn steps_advance_phase() {
        let mut pipeline = Orchestrator::new();
        pipeline.load_image(two_squares());
        assert_eq!(pipeline.phase(), Phase::OriginalLoaded);
        pipeline.correct_illumination(&illumination(31, 30)).unwrap();
        assert_eq!(pipeline.phase(), Phase::Corrected);
        pipeline.apply_filters(&filters()).unwrap();
        assert_eq!(pipeline.phase(), Phase::Filtered);
        pipeline.adjust_contrast(1.0).unwrap();
        assert_eq!(pipeline.phase(), Phase::ContrastAdjusted);
        let count = pipeline.count_dots(20, 8).unwrap().count();
        assert_eq!(count, 2);
        assert_eq!(pipeline.phase(), Phase::Counted);
        assert_eq!(pipeline.dot_count(), Some(2));
        assert_eq!(pipeline.centroids().unwrap().len(), 2);
    }

    #[test]
    fn correction_without_offset_uses_default() {
        let mut explicit = Orchestrator::new();
        explicit.load_image(two_squares());
        let expected = explicit.correct_illumination(&illumination(31, 30)).unwrap().clone();

        let mut defaulted = Orchestrator::new();
        defaulted.load_image(two_squares());
        let corrected = defaulted
            .correct_illumination(&IlluminationParameters::new(31))
            .unwrap();
        assert_eq!(corrected, &expected);
    }

    #[test]
    fn filtering_before_correction_is_not_ready() {
        let mut pipeline = Orchestrator::new();
        pipeline.load_image(two_squares());
        let err = pipeline.apply_filters(&filters()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageNotReady {
                missing: Stage::Corrected,
                ..
            }
        ));
        assert_eq!(pipeline.phase(), Phase::OriginalLoaded);
    }

    #[test]
    fn every_step_requires_its_input() {
        let mut pipeline = Orchestrator::new();
        assert!(matches!(
            pipeline.correct_illumination(&illumination(31, 30)),
            Err(PipelineError::StageNotReady {
                missing: Stage::Original,
                ..
            })
        ));
        pipeline.load_image(two_squares());
        assert!(matches!(
            pipeline.adjust_contrast(1.0),
            Err(PipelineError::StageNotReady {
                missing: Stage::Filtered,
                ..
            })
        ));
        assert!(matches!(
            pipeline.count_dots(1, 4),
            Err(PipelineError::StageNotReady {
                missing: Stage::Contrast,
                ..
            })
        ));
    }

    #[test]
    fn invalid_parameter_wins_over_missing_stage() {
        let mut pipeline = Orchestrator::new();
        assert!(matches!(
            pipeline.correct_illumination(&illumination(4, 30)),
            Err(PipelineError::InvalidParameter {
                parameter: "blur_kernel_size",
                ..
            })
        ));
    }

    #[test]
    fn rerunning_a_step_drops_downstream() {
        let mut pipeline = Orchestrator::new();
        pipeline.run_pipeline(two_squares(), &params()).unwrap();
        assert_eq!(pipeline.phase(), Phase::Counted);

        pipeline.correct_illumination(&illumination(15, 0)).unwrap();
        assert_eq!(pipeline.phase(), Phase::Corrected);
        assert!(pipeline.get_stage_output("filtered").is_none());
        assert!(pipeline.get_stage_output("dots_counted").is_none());
        assert!(pipeline.result().is_none());
    }

    #[test]
    fn failed_step_keeps_state() {
        let mut pipeline = Orchestrator::new();
        pipeline.run_pipeline(two_squares(), &params()).unwrap();
        let bad = FilterParameters {
            gaussian_blur: Some(4),
            ..filters()
        };
        assert!(pipeline.apply_filters(&bad).is_err());
        assert_eq!(pipeline.phase(), Phase::Counted);
        assert_eq!(pipeline.dot_count(), Some(2));
    }

    #[test]
    fn failed_run_keeps_previous_results() {
        let mut pipeline = Orchestrator::new();
        pipeline.run_pipeline(two_squares(), &params()).unwrap();
        let bad = PipelineParams {
            gaussian_blur: Some(4),
            ..params()
        };
        let err = pipeline.run_pipeline(GrayImage::new(10, 10), &bad).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidParameter {
                parameter: "gaussian_blur",
                ..
            }
        ));
        assert_eq!(pipeline.dot_count(), Some(2));
        assert_eq!(pipeline.stage(Stage::Original).unwrap().width(), 50);
    }

    #[test]
    fn stepwise_matches_full_run() {
        let mut stepwise = Orchestrator::new();
        stepwise.load_image(two_squares());
        stepwise.correct_illumination(&illumination(31, 30)).unwrap();
        stepwise.apply_filters(&filters()).unwrap();
        stepwise.adjust_contrast(1.0).unwrap();
        stepwise.count_dots(20, 8).unwrap();

        let mut full = Orchestrator::new();
        full.run_pipeline(two_squares(), &params()).unwrap();

        assert_eq!(stepwise.centroids(), full.centroids());
        for stage in [Stage::Corrected, Stage::Filtered, Stage::Contrast] {
            assert_eq!(stepwise.state().gray(stage), full.state().gray(stage));
        }
    }

    #[test]
    fn stage_lookup_by_name() {
        let mut pipeline = Orchestrator::new();
        pipeline.run_pipeline(two_squares(), &params()).unwrap();
        for stage in Stage::ALL {
            let view = pipeline.get_stage_output(stage.as_str()).unwrap();
            assert_eq!((view.width(), view.height()), (50, 50));
        }
        assert!(matches!(
            pipeline.get_stage_output("dots_counted"),
            Some(StageImage::Rgb(_))
        ));
        assert!(pipeline.get_stage_output("edges").is_none());
    }

    #[test]
    fn load_path_failure_keeps_state() {
        let mut pipeline = Orchestrator::new();
        pipeline.load_image(two_squares());
        let err = pipeline.load_path("/nonexistent/dots.png").unwrap_err();
        assert!(matches!(err, PipelineError::ImageLoad { .. }));
        assert_eq!(pipeline.phase(), Phase::OriginalLoaded);
    }

    #[test]
    fn clear_resets() {
        let mut pipeline = Orchestrator::new();
        pipeline.run_pipeline(two_squares(), &params()).unwrap();
        pipeline.clear();
        assert_eq!(pipeline.phase(), Phase::Empty);
    }
}
