//! dotscope-bench: CLI tool for dot-counting parameter tuning and diagnostics.
//!
//! Runs the counting pipeline on one micrograph with configurable
//! parameters and prints per-stage diagnostics. Useful for:
//!
//! - Tuning the background kernel, threshold and minimum dot area
//! - Measuring per-stage durations to identify bottlenecks
//! - Dumping every intermediate stage as a PNG for visual inspection
//! - Exporting centroids and summarizing nearest-neighbour spacing
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin dotscope-bench -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use dotscope_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use dotscope_pipeline::params::DEFAULT_BRIGHTNESS_OFFSET;
use dotscope_pipeline::{Histogram, Orchestrator, PipelineParams, Point, Stage};

/// Dot-counting parameter experimentation and diagnostics.
///
/// Runs the pipeline on a given image with configurable parameters and
/// prints detailed per-stage timing and count diagnostics.
#[derive(Parser)]
#[command(name = "dotscope-bench", version)]
struct Cli {
    /// Path to the input image (TIFF, PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Background-estimation blur kernel size (odd).
    #[arg(long, default_value_t = 101)]
    blur_kernel_size: u32,

    /// Brightness added after illumination correction.
    #[arg(long, default_value_t = DEFAULT_BRIGHTNESS_OFFSET, allow_hyphen_values = true)]
    brightness_offset: i32,

    /// Denoising Gaussian blur kernel size (odd).
    #[arg(long, default_value_t = 5)]
    gaussian_blur: u32,

    /// Skip the denoising blur.
    #[arg(long)]
    no_blur: bool,

    /// Binary threshold level (0-255).
    #[arg(long, default_value_t = 127, allow_hyphen_values = true)]
    threshold: i32,

    /// Skip thresholding.
    #[arg(long)]
    no_threshold: bool,

    /// Morphological opening element size (odd).
    #[arg(long, default_value_t = 3)]
    morph_open: u32,

    /// Skip morphological opening.
    #[arg(long)]
    no_open: bool,

    /// Contrast scale factor.
    #[arg(long, default_value_t = 1.5)]
    alpha: f64,

    /// Minimum blob area in pixels for a dot.
    #[arg(long, default_value_t = 25, allow_hyphen_values = true)]
    size_threshold: i64,

    /// Pixel connectivity (4 or 8).
    #[arg(long, default_value_t = 4)]
    connectivity: u8,

    /// Full parameter set as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineParams` serialization.
    #[arg(long)]
    params_json: Option<String>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Write every stage as `<stage>.png` into this directory.
    #[arg(long)]
    stage_dir: Option<PathBuf>,

    /// Write the accepted centroids as JSON to this file.
    #[arg(long)]
    centroids: Option<PathBuf>,

    /// Summarize distances to the K nearest neighbours of every dot.
    #[arg(long)]
    knn: Option<usize>,

    /// Histogram bin count for `--knn`.
    #[arg(long, default_value_t = 100)]
    bins: usize,
}

/// Build [`PipelineParams`] from CLI arguments.
///
/// If `--params-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn params_from_cli(cli: &Cli) -> Result<PipelineParams, String> {
    if let Some(ref json) = cli.params_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --params-json: {e}"));
    }

    Ok(PipelineParams {
        blur_kernel_size: cli.blur_kernel_size,
        brightness_offset: cli.brightness_offset,
        gaussian_blur: (!cli.no_blur).then_some(cli.gaussian_blur),
        threshold: (!cli.no_threshold).then_some(cli.threshold),
        morph_open: (!cli.no_open).then_some(cli.morph_open),
        alpha: cli.alpha,
        size_threshold: cli.size_threshold,
        connectivity: cli.connectivity,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let params = match params_from_cli(&cli) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!("Image: {}", cli.image_path.display());
    eprintln!("Params: {params:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut pipeline = Orchestrator::new();
    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match pipeline.run_pipeline_path_with_diagnostics(&cli.image_path, &params, &StdClock) {
            Ok(diagnostics) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }
                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    if let Some(ref dir) = cli.stage_dir
        && let Err(msg) = write_stages(&pipeline, dir)
    {
        eprintln!("{msg}");
        return ExitCode::FAILURE;
    }

    let centroids = pipeline.centroids().unwrap_or_default();

    if let Some(ref path) = cli.centroids
        && let Err(msg) = write_centroids(centroids, path)
    {
        eprintln!("{msg}");
        return ExitCode::FAILURE;
    }

    if let Some(k) = cli.knn
        && let Err(msg) = print_knn_summary(centroids, k, cli.bins)
    {
        eprintln!("{msg}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Save every available stage as `<dir>/<stage>.png`.
fn write_stages(pipeline: &Orchestrator, dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Error creating {}: {e}", dir.display()))?;
    for stage in Stage::ALL {
        let Some(view) = pipeline.stage(stage) else {
            continue;
        };
        let path = dir.join(format!("{stage}.png"));
        view.to_dynamic()
            .save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| format!("Error writing {}: {e}", path.display()))?;
        tracing::info!(%stage, path = %path.display(), "wrote stage image");
    }
    Ok(())
}

/// Write the centroid list as pretty JSON.
fn write_centroids(centroids: &[Point], path: &Path) -> Result<(), String> {
    let json = serde_json::to_string_pretty(centroids)
        .map_err(|e| format!("Error serializing centroids: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("Error writing {}: {e}", path.display()))?;
    tracing::info!(count = centroids.len(), path = %path.display(), "wrote centroids");
    Ok(())
}

/// Print a histogram of distances to the `k` nearest neighbours.
#[allow(clippy::cast_precision_loss)]
fn print_knn_summary(centroids: &[Point], k: usize, bins: usize) -> Result<(), String> {
    let distances: Vec<f64> = dotscope_pipeline::nearest_neighbor_distances(centroids, k)
        .into_iter()
        .flatten()
        .collect();
    let histogram = Histogram::from_values(&distances, bins).map_err(|e| e.to_string())?;

    println!();
    println!(
        "{k}-nearest-neighbour distances ({} dots)\n{}",
        centroids.len(),
        "=".repeat(60),
    );
    if histogram.is_empty() {
        println!("Not enough dots for neighbour distances");
        return Ok(());
    }

    let mean = distances.iter().sum::<f64>() / distances.len() as f64;
    let min = distances.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = distances.iter().copied().reduce(f64::max).unwrap_or(0.0);
    println!("min={min:.2}px  mean={mean:.2}px  max={max:.2}px");
    println!();

    for (count, edge) in histogram.counts.iter().zip(histogram.edges.windows(2)) {
        if *count > 0 {
            println!("[{:>8.2}, {:>8.2})  {count}", edge[0], edge[1]);
        }
    }
    Ok(())
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Load", |d| d.load.as_ref().map(|s| s.duration)),
        ("Illumination", |d| Some(d.correct.duration)),
        ("Filter", |d| Some(d.filter.duration)),
        ("Contrast", |d| Some(d.contrast.duration)),
        ("Count", |d| Some(d.count.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
