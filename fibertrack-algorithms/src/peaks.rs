//! Peak-image direction estimation.
//!
//! A peak image stores up to `k` fiber orientations per voxel as `3·k`
//! components; the length of each peak vector is its amplitude.

use crate::axial::AxialSum;
use fibertrack_core::geometry::{Direction, VolumeGeometry, MIN_DIRECTION_NORM};
use fibertrack_core::handler::{align_to_previous, HandlerOptions, Proposal, TrackingHandler};
use fibertrack_core::volume::{Corners, Interpolation, Volume};
use fibertrack_core::{Error, Result};
use nalgebra::Vector3;

/// Peak-specific configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct PeaksConfig {
    /// Peak amplitude below which no direction is proposed.
    pub cutoff: f64,
    /// Interpolation and flips.
    pub options: HandlerOptions,
}

impl Default for PeaksConfig {
    fn default() -> Self {
        Self {
            cutoff: 0.1,
            options: HandlerOptions::default(),
        }
    }
}

impl PeaksConfig {
    /// Sets the amplitude cutoff.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Sets the shared handler options.
    #[must_use]
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }
}

/// Peak tracking handler.
pub struct PeaksHandler {
    peaks: Volume,
    config: PeaksConfig,
}

impl PeaksHandler {
    /// Wraps a peak image with `3·k` components.
    pub fn new(peaks: Volume, config: PeaksConfig) -> Result<Self> {
        if peaks.components() % 3 != 0 {
            return Err(Error::InvalidVolume(format!(
                "peak image has {} components, expected a multiple of 3",
                peaks.components()
            )));
        }
        log::debug!(
            "Peak image with {} peaks per voxel",
            peaks.components() / 3
        );
        Ok(Self { peaks, config })
    }

    /// Number of peaks per voxel.
    #[must_use]
    pub fn peaks_per_voxel(&self) -> usize {
        self.peaks.components() / 3
    }

    /// Handler configuration.
    #[must_use]
    pub fn config(&self) -> &PeaksConfig {
        &self.config
    }

    /// Best peak of one voxel as `(unit vector, amplitude)`.
    ///
    /// With a previous direction the best peak is the most collinear one,
    /// otherwise the one with the largest amplitude.
    fn best_peak(&self, voxel: [usize; 3], previous: Option<&Direction>) -> Option<(Vector3<f64>, f64)> {
        let values = self.peaks.voxel(voxel);
        let mut best: Option<(Vector3<f64>, f64, f64)> = None;
        for peak in 0..self.peaks_per_voxel() {
            let raw = Vector3::new(
                f64::from(values[3 * peak]),
                f64::from(values[3 * peak + 1]),
                f64::from(values[3 * peak + 2]),
            );
            let amplitude = raw.norm();
            if !amplitude.is_finite() || amplitude < MIN_DIRECTION_NORM {
                continue;
            }
            let unit = self.config.options.flip.apply(&raw) / amplitude;
            let score = match previous {
                Some(previous) => unit.dot(previous.as_vector()).abs(),
                None => amplitude,
            };
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((unit, amplitude, score));
            }
        }
        best.map(|(unit, amplitude, _)| (unit, amplitude))
    }
}

impl TrackingHandler for PeaksHandler {
    fn name(&self) -> &'static str {
        "Peaks"
    }

    fn geometry(&self) -> &VolumeGeometry {
        self.peaks.geometry()
    }

    fn propose(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Proposal {
        let geometry = self.peaks.geometry();
        let (direction, amplitude) = match self.config.options.interpolation {
            Interpolation::Nearest => {
                let Some(voxel) = geometry.nearest_voxel(position) else {
                    return Proposal::none(0.0);
                };
                match self.best_peak(voxel, previous) {
                    Some((unit, amplitude)) => (Direction::new(unit), amplitude),
                    None => (None, 0.0),
                }
            }
            Interpolation::Trilinear => {
                let Some(corners) = Corners::around(geometry, position) else {
                    return Proposal::none(0.0);
                };
                let mut sum = AxialSum::new(previous);
                let mut amplitude = 0.0;
                for (voxel, weight) in corners.iter() {
                    if let Some((unit, peak_amplitude)) = self.best_peak(voxel, previous) {
                        sum.add(&unit, weight * peak_amplitude);
                        amplitude += weight * peak_amplitude;
                    }
                }
                (sum.direction(), amplitude)
            }
        };

        if amplitude < self.config.cutoff {
            return Proposal::none(amplitude);
        }
        match direction {
            Some(direction) => Proposal::new(align_to_previous(direction, previous), amplitude),
            None => Proposal::none(amplitude),
        }
    }
}
