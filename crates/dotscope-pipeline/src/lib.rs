//! dotscope-pipeline: fluorescent-dot counting for grayscale micrographs.
//!
//! Takes a micrograph through:
//! illumination correction -> blur -> threshold -> opening ->
//! contrast scaling -> blob labeling -> size filtering.
//!
//! Every stage is a pure function of its input buffer and parameters.
//! Apart from [`load_image`], which reads a file, the crate does no I/O:
//! it operates on in-memory buffers and returns structured data. The
//! [`Orchestrator`] keeps all intermediate stages of one run so they can
//! be looked up by name.

pub mod blob;
pub mod blur;
pub mod contrast;
pub mod count;
pub mod diagnostics;
pub mod filter;
pub mod grayscale;
pub mod illumination;
pub mod params;
pub mod pipeline;
pub mod spatial;
pub mod state;
pub mod types;

pub use count::{DotCountResult, count_dots};
pub use grayscale::{decode_grayscale, load_image};
pub use params::{
    Connectivity, ContrastParameters, CountParameters, FilterParameters, IlluminationParameters,
    KernelSize, MAX_MORPH_OPEN, PipelineParams,
};
pub use pipeline::Orchestrator;
pub use spatial::{Histogram, nearest_neighbor_distances, pairwise_distances};
pub use state::{Phase, PipelineState, Stage, StageImage, UnknownStage};
pub use types::{Blob, BoundingBox, Dimensions, GrayImage, PipelineError, Point, RgbImage};

/// Count the dots in `original` in one call.
///
/// Runs every stage in order and keeps only the final counting result:
///
/// 1. Illumination correction (background blur, subtract, normalize,
///    brightness offset)
/// 2. Filter chain (optional blur, threshold and opening)
/// 3. Contrast scaling
/// 4. Blob labeling and size filtering, with markers drawn on the
///    processed and original images
///
/// Use [`Orchestrator::run_pipeline`] to keep the intermediate stages.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] for the first invalid
/// parameter, before any pixel work.
pub fn process(
    original: &GrayImage,
    params: &PipelineParams,
) -> Result<DotCountResult, PipelineError> {
    let p = params.checked()?;
    Ok(state::run_stages(original, &p).dots)
}
