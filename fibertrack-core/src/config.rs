//! Tracking configuration and run statistics.

use crate::geometry::VolumeGeometry;
use crate::streamline::Termination;
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration of the propagation, sampling and seeding layers.
///
/// Lengths given in voxels are scaled by the smallest voxel spacing of the
/// reference grid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackingConfig {
    /// Step length (voxels).
    pub step_size_voxels: f64,
    /// Maximum direction change between consecutive steps (degrees).
    pub angular_threshold_deg: f64,
    /// Whether to terminate on direction changes above the threshold.
    pub curvature_check: bool,
    /// Seed points per seed voxel.
    pub seeds_per_voxel: usize,
    /// Seed only in gray matter (requires a tissue image).
    pub seed_only_gm: bool,
    /// Additional neighborhood samples per step (0 = direct query).
    pub num_samples: usize,
    /// Distance of neighborhood samples from the current point (voxels).
    pub sampling_distance_voxels: f64,
    /// Require a majority of samples to vote "no direction" before stopping.
    pub use_stop_votes: bool,
    /// Only sample the hemisphere ahead of the current direction.
    pub only_forward_samples: bool,
    /// Streamlines shorter than this are discarded (mm, 0 = keep all).
    pub min_tract_length: f64,
    /// Upper bound on each half-streamline's length (mm).
    pub max_tract_length: f64,
    /// Douglas-Peucker error threshold for output compression (mm).
    pub compress: Option<f64>,
    /// Seed of the per-voxel random generators.
    pub random_seed: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            step_size_voxels: 0.5,
            angular_threshold_deg: 45.0,
            curvature_check: true,
            seeds_per_voxel: 1,
            seed_only_gm: false,
            num_samples: 0,
            sampling_distance_voxels: 0.25,
            use_stop_votes: true,
            only_forward_samples: true,
            min_tract_length: 0.0,
            max_tract_length: 400.0,
            compress: None,
            random_seed: 0,
        }
    }
}

impl TrackingConfig {
    /// Creates a new tracking configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the step size (voxels).
    #[must_use]
    pub fn with_step_size(mut self, voxels: f64) -> Self {
        self.step_size_voxels = voxels;
        self
    }

    /// Sets the angular threshold (degrees).
    #[must_use]
    pub fn with_angular_threshold(mut self, degrees: f64) -> Self {
        self.angular_threshold_deg = degrees;
        self
    }

    /// Enables or disables the curvature check.
    #[must_use]
    pub fn with_curvature_check(mut self, enabled: bool) -> Self {
        self.curvature_check = enabled;
        self
    }

    /// Sets the number of seeds per voxel.
    #[must_use]
    pub fn with_seeds_per_voxel(mut self, seeds: usize) -> Self {
        self.seeds_per_voxel = seeds;
        self
    }

    /// Restricts seeding to gray matter.
    #[must_use]
    pub fn with_seed_only_gm(mut self, enabled: bool) -> Self {
        self.seed_only_gm = enabled;
        self
    }

    /// Sets neighborhood sampling parameters.
    #[must_use]
    pub fn with_neighborhood_sampling(mut self, num_samples: usize, distance_voxels: f64) -> Self {
        self.num_samples = num_samples;
        self.sampling_distance_voxels = distance_voxels;
        self
    }

    /// Enables or disables stop votes.
    #[must_use]
    pub fn with_stop_votes(mut self, enabled: bool) -> Self {
        self.use_stop_votes = enabled;
        self
    }

    /// Enables or disables forward-only sampling.
    #[must_use]
    pub fn with_only_forward_samples(mut self, enabled: bool) -> Self {
        self.only_forward_samples = enabled;
        self
    }

    /// Sets the accepted tract length range (mm).
    #[must_use]
    pub fn with_tract_length(mut self, min: f64, max: f64) -> Self {
        self.min_tract_length = min;
        self.max_tract_length = max;
        self
    }

    /// Sets the compression error threshold (mm); non-positive disables it.
    #[must_use]
    pub fn with_compression(mut self, max_error: f64) -> Self {
        self.compress = (max_error > 0.0).then_some(max_error);
        self
    }

    /// Sets the random seed.
    #[must_use]
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Step length in mm on `geometry`.
    #[must_use]
    pub fn step_size_mm(&self, geometry: &VolumeGeometry) -> f64 {
        self.step_size_voxels * geometry.min_spacing()
    }

    /// Neighborhood sampling distance in mm on `geometry`.
    #[must_use]
    pub fn sampling_distance_mm(&self, geometry: &VolumeGeometry) -> f64 {
        self.sampling_distance_voxels * geometry.min_spacing()
    }

    /// Maximum number of steps per half-streamline on `geometry`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn max_steps(&self, geometry: &VolumeGeometry) -> usize {
        (self.max_tract_length / self.step_size_mm(geometry)).ceil() as usize
    }

    /// Checks parameter ranges.
    pub fn validate(&self) -> Result<()> {
        let positive = |value: f64| value.is_finite() && value > 0.0;
        if !positive(self.step_size_voxels) {
            return Err(Error::ConfigError(format!(
                "step size must be positive, got {}",
                self.step_size_voxels
            )));
        }
        if !(self.angular_threshold_deg.is_finite()
            && self.angular_threshold_deg > 0.0
            && self.angular_threshold_deg <= 180.0)
        {
            return Err(Error::ConfigError(format!(
                "angular threshold must be in (0, 180], got {}",
                self.angular_threshold_deg
            )));
        }
        if self.seeds_per_voxel == 0 {
            return Err(Error::ConfigError(
                "seeds per voxel must be at least 1".to_string(),
            ));
        }
        if self.num_samples > 0 && !positive(self.sampling_distance_voxels) {
            return Err(Error::ConfigError(format!(
                "sampling distance must be positive, got {}",
                self.sampling_distance_voxels
            )));
        }
        if !positive(self.max_tract_length) || self.min_tract_length < 0.0 {
            return Err(Error::ConfigError(format!(
                "invalid tract length range [{}, {}]",
                self.min_tract_length, self.max_tract_length
            )));
        }
        if let Some(max_error) = self.compress {
            if !positive(max_error) {
                return Err(Error::ConfigError(format!(
                    "compression error must be positive, got {max_error}"
                )));
            }
        }
        if self.min_tract_length > self.max_tract_length * 2.0 {
            return Err(Error::ConfigError(format!(
                "minimum tract length {} can never be reached with maximum {} per half",
                self.min_tract_length, self.max_tract_length
            )));
        }
        Ok(())
    }
}

/// Per-reason termination counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TerminationCounts {
    /// Halves that ended without a valid direction.
    pub stop: usize,
    /// Halves that left the tracking domain.
    pub boundary: usize,
    /// Halves that exceeded the angular threshold.
    pub curvature: usize,
    /// Halves that ran out of steps.
    pub max_length: usize,
}

impl TerminationCounts {
    /// Counts one termination.
    pub fn record(&mut self, termination: Termination) {
        match termination {
            Termination::Stop => self.stop += 1,
            Termination::Boundary => self.boundary += 1,
            Termination::Curvature => self.curvature += 1,
            Termination::MaxLength => self.max_length += 1,
        }
    }

    /// Total counted terminations.
    #[must_use]
    pub fn total(&self) -> usize {
        self.stop + self.boundary + self.curvature + self.max_length
    }

    /// Adds the counts of another set.
    pub fn merge(&mut self, other: &TerminationCounts) {
        self.stop += other.stop;
        self.boundary += other.boundary;
        self.curvature += other.curvature;
        self.max_length += other.max_length;
    }
}

/// Statistics from a tracking run.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackingStatistics {
    /// Number of seed points processed.
    pub seeds: usize,
    /// Streamlines written to the bundle.
    pub streamlines: usize,
    /// Seeds that produced no streamline (no initial direction, degenerate
    /// or too short).
    pub discarded: usize,
    /// Points in the bundle (after compression).
    pub points: usize,
    /// Termination reasons over all tracked halves.
    pub terminations: TerminationCounts,
    /// Wall-clock tracking time (seconds).
    pub elapsed_secs: f64,
}
