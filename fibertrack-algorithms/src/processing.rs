//! High-level tracking pipeline: seed, propagate in parallel, collect.

use crate::compress::douglas_peucker;
use crate::forest::ForestHandler;
use crate::peaks::PeaksHandler;
use crate::propagator::{Propagator, TrackingMasks};
use crate::seeding::{seed_points, seed_voxels, voxel_rng};
use crate::tensor::TensorHandler;
use fibertrack_core::bundle::FiberBundle;
use fibertrack_core::config::{TerminationCounts, TrackingConfig, TrackingStatistics};
use fibertrack_core::geometry::{Direction, VolumeGeometry};
use fibertrack_core::handler::{Proposal, TrackingHandler};
use fibertrack_core::streamline::Streamline;
use fibertrack_core::{Error, Result};
use nalgebra::Vector3;
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Available direction-estimation strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingAlgorithm {
    /// Principal eigenvector of diffusion tensors.
    Tensor,
    /// Peak orientation images.
    Peaks,
    /// Random-forest voxel classifier.
    RandomForest,
}

impl TrackingAlgorithm {
    /// Canonical name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Tensor => "Tensor",
            Self::Peaks => "Peaks",
            Self::RandomForest => "RandomForest",
        }
    }
}

impl fmt::Display for TrackingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrackingAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tensor" => Ok(Self::Tensor),
            "peaks" => Ok(Self::Peaks),
            "randomforest" | "random-forest" | "classifier" => Ok(Self::RandomForest),
            _ => Err(Error::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// A configured handler of any supported kind.
pub enum Handler {
    /// Tensor handler.
    Tensor(TensorHandler),
    /// Peak handler.
    Peaks(PeaksHandler),
    /// Random-forest handler.
    RandomForest(ForestHandler),
}

impl Handler {
    /// Strategy of this handler.
    #[must_use]
    pub fn algorithm(&self) -> TrackingAlgorithm {
        match self {
            Self::Tensor(_) => TrackingAlgorithm::Tensor,
            Self::Peaks(_) => TrackingAlgorithm::Peaks,
            Self::RandomForest(_) => TrackingAlgorithm::RandomForest,
        }
    }
}

impl TrackingHandler for Handler {
    fn name(&self) -> &'static str {
        self.algorithm().name()
    }

    fn geometry(&self) -> &VolumeGeometry {
        match self {
            Self::Tensor(h) => h.geometry(),
            Self::Peaks(h) => h.geometry(),
            Self::RandomForest(h) => h.geometry(),
        }
    }

    fn propose(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Proposal {
        match self {
            Self::Tensor(h) => h.propose(position, previous),
            Self::Peaks(h) => h.propose(position, previous),
            Self::RandomForest(h) => h.propose(position, previous),
        }
    }
}

impl From<TensorHandler> for Handler {
    fn from(handler: TensorHandler) -> Self {
        Self::Tensor(handler)
    }
}

impl From<PeaksHandler> for Handler {
    fn from(handler: PeaksHandler) -> Self {
        Self::Peaks(handler)
    }
}

impl From<ForestHandler> for Handler {
    fn from(handler: ForestHandler) -> Self {
        Self::RandomForest(handler)
    }
}

/// Result of a tracking run.
#[derive(Debug, Clone, Default)]
pub struct TrackingOutput {
    /// Kept streamlines, in seed order.
    pub bundle: FiberBundle,
    /// Run statistics.
    pub statistics: TrackingStatistics,
}

/// Tracks every seed and collects the streamlines.
pub fn track_streamlines<H>(
    handler: &H,
    masks: &TrackingMasks,
    config: &TrackingConfig,
) -> Result<TrackingOutput>
where
    H: TrackingHandler + ?Sized,
{
    track_streamlines_with_cancel(handler, masks, config, &AtomicBool::new(false))
}

/// Tracks every seed, checking `cancel` before each seed voxel.
///
/// A cancelled run returns [`Error::Cancelled`] and no partial bundle.
pub fn track_streamlines_with_cancel<H>(
    handler: &H,
    masks: &TrackingMasks,
    config: &TrackingConfig,
    cancel: &AtomicBool,
) -> Result<TrackingOutput>
where
    H: TrackingHandler + ?Sized,
{
    let start = Instant::now();
    let propagator = Propagator::new(handler, masks, config)?;
    let geometry = handler.geometry();
    let voxels = seed_voxels(geometry, masks, config.seed_only_gm)?;
    if voxels.is_empty() {
        log::warn!("Seed region is empty, no streamlines will be tracked");
    }

    log::info!(
        "Tracking {} seeds ({} voxels x {}) with {}",
        voxels.len() * config.seeds_per_voxel,
        voxels.len(),
        config.seeds_per_voxel,
        handler.name()
    );
    log::debug!(
        "Step {:.3} mm, max {} steps per half, {} neighborhood samples",
        propagator.step_size(),
        propagator.max_steps(),
        config.num_samples
    );

    let per_voxel: Vec<Option<Vec<Option<Streamline>>>> = voxels
        .par_iter()
        .map(|&voxel| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let mut rng = voxel_rng(config.random_seed, geometry.linear_index(voxel));
            let seeds = seed_points(geometry, voxel, config.seeds_per_voxel, &mut rng);
            Some(
                seeds
                    .iter()
                    .map(|seed| propagator.track(seed, &mut rng))
                    .collect(),
            )
        })
        .collect();

    if cancel.load(Ordering::Relaxed) || per_voxel.iter().any(Option::is_none) {
        log::info!("Tracking cancelled");
        return Err(Error::Cancelled);
    }

    let mut statistics = TrackingStatistics::default();
    let mut terminations = TerminationCounts::default();
    let mut bundle = FiberBundle::default();
    for streamline in per_voxel.into_iter().flatten().flatten() {
        statistics.seeds += 1;
        let Some(streamline) = streamline else {
            statistics.discarded += 1;
            continue;
        };
        terminations.record(streamline.backward_termination());
        terminations.record(streamline.forward_termination());
        if streamline.is_degenerate() || streamline.length() < config.min_tract_length {
            statistics.discarded += 1;
            continue;
        }
        let positions: Vec<Vector3<f64>> = streamline.positions().collect();
        match config.compress {
            Some(max_error) => bundle.push_fiber(douglas_peucker(&positions, max_error)),
            None => bundle.push_fiber(positions),
        }
    }
    statistics.streamlines = bundle.len();
    statistics.points = bundle.total_points();
    statistics.terminations = terminations;
    statistics.elapsed_secs = start.elapsed().as_secs_f64();

    log::info!(
        "Tracked {} streamlines ({} points) from {} seeds in {:.2}s; {} discarded",
        statistics.streamlines,
        statistics.points,
        statistics.seeds,
        statistics.elapsed_secs,
        statistics.discarded
    );
    log::debug!("Terminations: {:?}", statistics.terminations);

    Ok(TrackingOutput { bundle, statistics })
}
