//! fibertrack command-line interface.
//!
//! Loads diffusion-derived volumes, runs streamline tractography with the
//! selected handler and writes the resulting bundle.
#![allow(
    clippy::uninlined_format_args,
    clippy::struct_excessive_bools,
    clippy::large_enum_variant
)]

use clap::{ArgAction, Args, Parser, Subcommand};

use fibertrack_algorithms::{
    track_streamlines, ForestConfig, ForestHandler, Handler, PeaksConfig, PeaksHandler,
    TensorConfig, TensorHandler, TrackingAlgorithm, TrackingConfig, TrackingMasks,
};
use fibertrack_core::forest::FeatureLayout;
use fibertrack_core::geometry::Flip;
use fibertrack_core::handler::HandlerOptions;
use fibertrack_core::volume::{Interpolation, Volume};
use fibertrack_io::{
    load_forest, load_gradients, load_mask, load_volume, write_bundle, FiberFormat,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    FibertrackIo(#[from] fibertrack_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] fibertrack_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    Usage(String),
}

/// Streamline tractography on diffusion MRI volumes.
#[derive(Parser)]
#[command(name = "fibertrack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track streamlines and write them to a file
    Track(TrackArgs),

    /// Show information about a NIfTI volume
    Info {
        /// Input NIfTI file
        input: PathBuf,
    },
}

#[derive(Args)]
struct TrackArgs {
    /// Input volume(s): tensor images, a peak image, or a diffusion-weighted image
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Output file (.vtk, .fib, .csv, .bin)
    #[arg(short, long)]
    output: PathBuf,

    /// Tracking algorithm: Tensor, Peaks, or RandomForest (alias: Classifier)
    #[arg(short, long, default_value = "Tensor")]
    algorithm: TrackingAlgorithm,

    /// Streamlines stop when entering this mask
    #[arg(long)]
    stop_mask: Option<PathBuf>,

    /// Streamlines stop when leaving this mask
    #[arg(long)]
    tracking_mask: Option<PathBuf>,

    /// Seeds are placed in the foreground of this mask
    #[arg(long)]
    seed_mask: Option<PathBuf>,

    /// Tissue-type image (1 = gray matter, 3 = white matter)
    #[arg(long)]
    tissue_image: Option<PathBuf>,

    /// FA image used for the tensor cutoff instead of the tensors' own FA
    #[arg(long)]
    fa_image: Option<PathBuf>,

    /// Minimum FA (Tensor) or peak amplitude (Peaks) to continue tracking
    #[arg(long, default_value = "0.1")]
    cutoff: f64,

    /// Step size in voxels (of the smallest spacing)
    #[arg(long, default_value = "0.5")]
    step_size: f64,

    /// Maximum direction change per step in degrees
    #[arg(long, default_value = "45.0")]
    angular_threshold: f64,

    /// Stop streamlines that exceed the angular threshold
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    curvature_check: bool,

    /// Seeds per seed voxel
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Seed only in gray matter and stop when re-entering it
    #[arg(long)]
    seed_gm: bool,

    /// Neighborhood samples per step
    #[arg(long, default_value = "0")]
    num_samples: usize,

    /// Neighborhood sampling distance in voxels
    #[arg(long, default_value = "0.25")]
    sampling_distance: f64,

    /// Stop when most neighborhood samples find no direction
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    use_stop_votes: bool,

    /// Sample only the half-sphere ahead of the current direction
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    only_forward_samples: bool,

    /// Use nearest-voxel lookups instead of trilinear interpolation
    #[arg(long)]
    no_interpolation: bool,

    /// Flip the X component of data-derived directions
    #[arg(long)]
    flip_x: bool,

    /// Flip the Y component of data-derived directions
    #[arg(long)]
    flip_y: bool,

    /// Flip the Z component of data-derived directions
    #[arg(long)]
    flip_z: bool,

    /// Douglas-Peucker compression error in mm (disabled when absent or <= 0)
    #[arg(long)]
    compress: Option<f64>,

    /// Minimum streamline length in mm
    #[arg(long, default_value = "0.0")]
    min_length: f64,

    /// Maximum length of each half-streamline in mm
    #[arg(long, default_value = "400.0")]
    max_length: f64,

    /// Tensor deflection: weight of the principal direction
    #[arg(long, default_value = "1.0")]
    tend_f: f64,

    /// Tensor deflection: weight of the deflected previous direction
    #[arg(long, default_value = "0.0")]
    tend_g: f64,

    /// Random-forest model (JSON)
    #[arg(long)]
    forest: Option<PathBuf>,

    /// The forest uses spherical-harmonic coefficient features
    #[arg(long)]
    use_sh_features: bool,

    /// Additional scalar feature images for the random forest
    #[arg(long, num_args = 1..)]
    additional_images: Vec<PathBuf>,

    /// b-values file (defaults to the input with a .bval extension)
    #[arg(long)]
    bvals: Option<PathBuf>,

    /// b-vectors file (defaults to the input with a .bvec extension)
    #[arg(long)]
    bvecs: Option<PathBuf>,

    /// Random seed for seed jitter and neighborhood sampling
    #[arg(long, default_value = "0")]
    random_seed: u64,

    /// Worker threads (defaults to all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Write run statistics as JSON to this file
    #[arg(long)]
    stats: Option<PathBuf>,
}

impl TrackArgs {
    fn tracking_config(&self) -> TrackingConfig {
        let mut config = TrackingConfig::default()
            .with_step_size(self.step_size)
            .with_angular_threshold(self.angular_threshold)
            .with_curvature_check(self.curvature_check)
            .with_seeds_per_voxel(self.seeds)
            .with_seed_only_gm(self.seed_gm)
            .with_neighborhood_sampling(self.num_samples, self.sampling_distance)
            .with_stop_votes(self.use_stop_votes)
            .with_only_forward_samples(self.only_forward_samples)
            .with_tract_length(self.min_length, self.max_length)
            .with_random_seed(self.random_seed);
        if let Some(max_error) = self.compress {
            config = config.with_compression(max_error);
        }
        config
    }

    fn handler_options(&self) -> HandlerOptions {
        let interpolation = if self.no_interpolation {
            Interpolation::Nearest
        } else {
            Interpolation::Trilinear
        };
        HandlerOptions::new()
            .with_interpolation(interpolation)
            .with_flip(Flip::new(self.flip_x, self.flip_y, self.flip_z))
    }
}

/// `dwi.nii.gz` -> `dwi.<extension>` in the same directory.
fn sibling(path: &Path, extension: &str) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let stem = name.strip_suffix(".gz").unwrap_or(name);
    let stem = stem.strip_suffix(".nii").unwrap_or(stem);
    path.with_file_name(format!("{stem}.{extension}"))
}

fn load_volumes(paths: &[PathBuf]) -> Result<Vec<Volume>> {
    paths
        .iter()
        .map(|path| load_volume(path).map_err(CliError::from))
        .collect()
}

/// FA image for the tensor cutoff: `--fa-image`, else the first additional image.
fn tensor_fa_path(args: &TrackArgs) -> Option<&Path> {
    match (&args.fa_image, args.additional_images.split_first()) {
        (Some(path), additional) => {
            if additional.is_some() {
                log::warn!("Tensor tracking ignores --additional-images when --fa-image is set");
            }
            Some(path.as_path())
        }
        (None, Some((first, rest))) => {
            if !rest.is_empty() {
                log::warn!("Tensor tracking uses only the first additional image as FA image");
            }
            Some(first.as_path())
        }
        (None, None) => None,
    }
}

/// Checks mask-only constraints that need no input volume.
fn check_masks(masks: &TrackingMasks, config: &TrackingConfig) -> Result<()> {
    if config.seed_only_gm && masks.tissue.is_none() {
        return Err(CliError::Usage("--seed-gm requires --tissue-image".to_string()));
    }
    let reference = [&masks.stop, &masks.tracking, &masks.seed, &masks.tissue]
        .into_iter()
        .flatten()
        .next()
        .map(|mask| mask.geometry().clone());
    if let Some(reference) = reference {
        masks.ensure_grid(&reference)?;
    }
    Ok(())
}

fn build_handler(args: &TrackArgs, masks: &TrackingMasks) -> Result<Handler> {
    let options = args.handler_options();
    let handler = match args.algorithm {
        TrackingAlgorithm::Tensor => {
            let tensors = load_volumes(&args.input)?;
            masks.ensure_grid(tensors[0].geometry())?;
            let fa_image = tensor_fa_path(args).map(load_volume).transpose()?;
            let config = TensorConfig::default()
                .with_cutoff(args.cutoff)
                .with_tend(args.tend_f, args.tend_g)
                .with_options(options);
            TensorHandler::new(tensors, fa_image, config)?.into()
        }
        TrackingAlgorithm::Peaks => {
            if args.input.len() > 1 {
                log::warn!("Peaks tracking uses only the first input image");
            }
            if args.fa_image.is_some() || !args.additional_images.is_empty() {
                log::warn!("Peaks tracking ignores --fa-image and --additional-images");
            }
            let peaks = load_volume(&args.input[0])?;
            masks.ensure_grid(peaks.geometry())?;
            let config = PeaksConfig::default()
                .with_cutoff(args.cutoff)
                .with_options(options);
            PeaksHandler::new(peaks, config)?.into()
        }
        TrackingAlgorithm::RandomForest => {
            let forest = args.forest.as_ref().ok_or_else(|| {
                CliError::Usage("RandomForest tracking requires --forest".to_string())
            })?;
            if args.fa_image.is_some() {
                log::warn!("RandomForest tracking ignores --fa-image");
            }
            let model = load_forest(forest)?;
            let dwi_path = &args.input[0];
            let bvals = args
                .bvals
                .clone()
                .unwrap_or_else(|| sibling(dwi_path, "bval"));
            let bvecs = args
                .bvecs
                .clone()
                .unwrap_or_else(|| sibling(dwi_path, "bvec"));
            let gradients = load_gradients(&bvals, &bvecs)?;
            let dwi = load_volume(dwi_path)?;
            masks.ensure_grid(dwi.geometry())?;
            let additional = load_volumes(&args.additional_images)?;
            let layout = if args.use_sh_features {
                FeatureLayout::Reduced
            } else {
                FeatureLayout::Extended
            };
            let config = ForestConfig::default()
                .with_angular_threshold(args.angular_threshold)
                .with_layout(layout)
                .with_options(options);
            ForestHandler::new(dwi, &gradients, model, additional, config)?.into()
        }
    };
    Ok(handler)
}

fn load_masks(args: &TrackArgs) -> Result<TrackingMasks> {
    let load = |path: &Option<PathBuf>| path.as_ref().map(load_mask).transpose();
    Ok(TrackingMasks {
        stop: load(&args.stop_mask)?,
        tracking: load(&args.tracking_mask)?,
        seed: load(&args.seed_mask)?,
        tissue: load(&args.tissue_image)?,
    })
}

fn run_track(args: &TrackArgs) -> Result<()> {
    // Fail on bad options before loading anything.
    FiberFormat::from_path(&args.output)?;
    let config = args.tracking_config();
    config.validate()?;
    if args.cutoff < 0.0 || !args.cutoff.is_finite() {
        return Err(CliError::Usage(format!(
            "cutoff must be a non-negative number, got {}",
            args.cutoff
        )));
    }
    let masks = load_masks(args)?;
    check_masks(&masks, &config)?;

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    log::info!("Loading {} input(s) for {}", args.input.len(), args.algorithm);
    let handler = build_handler(args, &masks)?;

    let output = track_streamlines(&handler, &masks, &config)?;
    write_bundle(&args.output, &output.bundle)?;

    if let Some(path) = &args.stats {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &output.statistics)?;
    }

    let stats = &output.statistics;
    println!(
        "Tracked {} streamlines ({} points) from {} seeds in {:.2}s",
        stats.streamlines, stats.points, stats.seeds, stats.elapsed_secs
    );
    println!("Discarded: {}", stats.discarded);
    println!(
        "Terminations: stop {}, boundary {}, curvature {}, max length {}",
        stats.terminations.stop,
        stats.terminations.boundary,
        stats.terminations.curvature,
        stats.terminations.max_length
    );
    println!("Output: {}", args.output.display());
    Ok(())
}

fn run_info(input: &Path) -> Result<()> {
    let volume = load_volume(input)?;
    let geometry = volume.geometry();
    let [nx, ny, nz] = geometry.dims();
    let spacing = geometry.spacing();
    let origin = geometry.origin();

    println!("File: {}", input.display());
    println!("Dimensions: {} x {} x {}", nx, ny, nz);
    println!("Components: {}", volume.components());
    println!(
        "Spacing: {:.3} x {:.3} x {:.3} mm",
        spacing[0], spacing[1], spacing[2]
    );
    println!("Origin: ({:.3}, {:.3}, {:.3})", origin.x, origin.y, origin.z);

    let (min, max) = volume
        .data()
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if min <= max {
        println!("Value range: {} - {}", min, max);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::Info { input } => run_info(&input),
    }
}
