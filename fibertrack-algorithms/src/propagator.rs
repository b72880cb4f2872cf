//! Streamline propagation state machine.
//!
//! A seed is grown in both directions along the handler's initial estimate.
//! Each half advances step by step until a termination rule fires; the two
//! halves are then joined at the seed.

use crate::sampler::NeighborhoodSampler;
use fibertrack_core::config::TrackingConfig;
use fibertrack_core::geometry::{Direction, VolumeGeometry};
use fibertrack_core::handler::TrackingHandler;
use fibertrack_core::streamline::{PropagationState, Streamline, StreamlinePoint, Termination};
use fibertrack_core::volume::{Mask, TissueType};
use fibertrack_core::{Error, Result};
use nalgebra::Vector3;
use rand::Rng;

/// Optional label images that restrict seeding and propagation.
#[derive(Debug, Clone, Default)]
pub struct TrackingMasks {
    /// Entering the foreground terminates a streamline.
    pub stop: Option<Mask>,
    /// Leaving the foreground terminates a streamline.
    pub tracking: Option<Mask>,
    /// Foreground voxels are seeded; the whole grid when absent.
    pub seed: Option<Mask>,
    /// Five-tissue-type labels.
    pub tissue: Option<Mask>,
}

impl TrackingMasks {
    /// No masks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stop-region mask.
    #[must_use]
    pub fn with_stop(mut self, mask: Mask) -> Self {
        self.stop = Some(mask);
        self
    }

    /// Sets the tracking mask.
    #[must_use]
    pub fn with_tracking(mut self, mask: Mask) -> Self {
        self.tracking = Some(mask);
        self
    }

    /// Sets the seed mask.
    #[must_use]
    pub fn with_seed(mut self, mask: Mask) -> Self {
        self.seed = Some(mask);
        self
    }

    /// Sets the tissue-type image.
    #[must_use]
    pub fn with_tissue(mut self, mask: Mask) -> Self {
        self.tissue = Some(mask);
        self
    }

    /// Checks that every mask lies on `geometry`.
    pub fn ensure_grid(&self, geometry: &VolumeGeometry) -> Result<()> {
        for (name, mask) in [
            ("stop mask", &self.stop),
            ("tracking mask", &self.tracking),
            ("seed mask", &self.seed),
            ("tissue image", &self.tissue),
        ] {
            if let Some(mask) = mask {
                geometry.ensure_same_grid(mask.geometry(), name)?;
            }
        }
        Ok(())
    }
}

/// One growing half-streamline.
struct Cursor {
    position: Vector3<f64>,
    direction: Direction,
    visited_white_matter: bool,
    points: Vec<StreamlinePoint>,
}

/// Grows streamlines from seed points.
pub struct Propagator<'a, H: TrackingHandler + ?Sized> {
    sampler: NeighborhoodSampler<'a, H>,
    masks: &'a TrackingMasks,
    step: f64,
    max_steps: usize,
    max_angle: Option<f64>,
    tissue_stop: bool,
}

impl<'a, H: TrackingHandler + ?Sized> Propagator<'a, H> {
    /// Creates a propagator.
    ///
    /// Fails if the configuration is invalid or a mask does not share the
    /// handler's grid.
    pub fn new(handler: &'a H, masks: &'a TrackingMasks, config: &TrackingConfig) -> Result<Self> {
        config.validate()?;
        let geometry = handler.geometry();
        masks.ensure_grid(geometry)?;
        if config.seed_only_gm && masks.tissue.is_none() {
            return Err(Error::ConfigError(
                "gray-matter seeding requires a tissue-type image".to_string(),
            ));
        }
        Ok(Self {
            sampler: NeighborhoodSampler::new(handler, config),
            masks,
            step: config.step_size_mm(geometry),
            max_steps: config.max_steps(geometry),
            max_angle: config.curvature_check.then_some(config.angular_threshold_deg),
            tissue_stop: config.seed_only_gm,
        })
    }

    /// Step length (mm).
    #[must_use]
    pub fn step_size(&self) -> f64 {
        self.step
    }

    /// Maximum number of steps per half-streamline.
    #[must_use]
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Tracks one seed.
    ///
    /// Returns `None` when the handler has no direction at the seed.
    pub fn track<R: Rng + ?Sized>(&self, seed: &Vector3<f64>, rng: &mut R) -> Option<Streamline> {
        let initial = self.sampler.handler().propose(seed, None).direction?;
        let (backward, backward_end) = self.grow(seed, -initial, rng);
        let (forward, forward_end) = self.grow(seed, initial, rng);
        Some(Streamline::join(
            StreamlinePoint::new(*seed, initial),
            &backward,
            backward_end,
            &forward,
            forward_end,
        ))
    }

    /// Grows one half from `seed` along `direction`.
    fn grow<R: Rng + ?Sized>(
        &self,
        seed: &Vector3<f64>,
        direction: Direction,
        rng: &mut R,
    ) -> (Vec<StreamlinePoint>, Termination) {
        let mut cursor = Cursor {
            position: *seed,
            direction,
            visited_white_matter: self.is_tissue(seed, TissueType::White),
            points: Vec::new(),
        };
        let mut state = PropagationState::Seeded;
        let mut steps = 0;
        while !state.is_terminated() {
            state = if steps >= self.max_steps {
                PropagationState::Terminated(Termination::MaxLength)
            } else {
                self.step(&mut cursor, rng)
            };
            steps += 1;
        }
        let end = state.termination().unwrap_or(Termination::Stop);
        (cursor.points, end)
    }

    /// Advances a half-streamline by one step.
    fn step<R: Rng + ?Sized>(&self, cursor: &mut Cursor, rng: &mut R) -> PropagationState {
        let previous = cursor.direction;
        let Some(direction) = self
            .sampler
            .sample(&cursor.position, Some(&previous), rng)
            .direction
        else {
            return PropagationState::Terminated(Termination::Stop);
        };
        let direction = direction.aligned_with(&previous);

        if let Some(max_angle) = self.max_angle {
            if direction.angle_deg(&previous) > max_angle {
                return PropagationState::Terminated(Termination::Curvature);
            }
        }

        let next = cursor.position + direction.scaled(self.step);
        if !self.in_domain(&next) {
            return PropagationState::Terminated(Termination::Boundary);
        }

        if self.tissue_stop {
            if self.is_tissue(&next, TissueType::White) {
                cursor.visited_white_matter = true;
            } else if cursor.visited_white_matter && self.is_tissue(&next, TissueType::Gray) {
                return PropagationState::Terminated(Termination::Stop);
            }
        }

        cursor.position = next;
        cursor.direction = direction;
        cursor.points.push(StreamlinePoint::new(next, direction));
        PropagationState::Propagating
    }

    /// Inside the volume and tracking mask, outside the stop region.
    fn in_domain(&self, position: &Vector3<f64>) -> bool {
        if !self.sampler.handler().geometry().contains(position) {
            return false;
        }
        if let Some(tracking) = &self.masks.tracking {
            if !tracking.contains(position) {
                return false;
            }
        }
        if let Some(stop) = &self.masks.stop {
            if stop.contains(position) {
                return false;
            }
        }
        true
    }

    fn is_tissue(&self, position: &Vector3<f64>, tissue: TissueType) -> bool {
        self.masks
            .tissue
            .as_ref()
            .and_then(|mask| mask.label_at(position))
            .is_some_and(|label| label == tissue.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fibertrack_core::handler::{align_to_previous, Proposal};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Constant direction everywhere inside the grid.
    struct Uniform {
        geometry: VolumeGeometry,
        direction: Direction,
    }

    impl TrackingHandler for Uniform {
        fn name(&self) -> &'static str {
            "Uniform"
        }

        fn geometry(&self) -> &VolumeGeometry {
            &self.geometry
        }

        fn propose(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Proposal {
            if self.geometry.contains(position) {
                Proposal::new(align_to_previous(self.direction, previous), 1.0)
            } else {
                Proposal::none(0.0)
            }
        }
    }

    /// +X for x < 5, +Y beyond: a right-angle turn.
    struct Corner {
        geometry: VolumeGeometry,
    }

    impl TrackingHandler for Corner {
        fn name(&self) -> &'static str {
            "Corner"
        }

        fn geometry(&self) -> &VolumeGeometry {
            &self.geometry
        }

        fn propose(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Proposal {
            let d = if position.x < 5.0 {
                Direction::from_xyz(1.0, 0.0, 0.0)
            } else {
                Direction::from_xyz(0.0, 1.0, 0.0)
            };
            Proposal::new(align_to_previous(d.unwrap(), previous), 1.0)
        }
    }

    fn grid() -> VolumeGeometry {
        VolumeGeometry::new([11, 11, 11], [1.0; 3], [0.0; 3]).unwrap()
    }

    fn uniform_x() -> Uniform {
        Uniform {
            geometry: grid(),
            direction: Direction::from_xyz(1.0, 0.0, 0.0).unwrap(),
        }
    }

    #[test]
    fn test_grows_both_ways_to_the_volume_boundary() {
        let handler = uniform_x();
        let masks = TrackingMasks::new();
        let config = TrackingConfig::default().with_step_size(1.0);
        let propagator = Propagator::new(&handler, &masks, &config).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let seed = Vector3::new(5.0, 5.0, 5.0);
        let streamline = propagator.track(&seed, &mut rng).unwrap();
        // x = 0..=10 inclusive, bounds reach x = 10.5.
        assert_eq!(streamline.len(), 11);
        assert_eq!(streamline.seed().position, seed);
        assert_eq!(streamline.backward_termination(), Termination::Boundary);
        assert_eq!(streamline.forward_termination(), Termination::Boundary);
        let first = streamline.points()[0].position;
        let last = streamline.points()[10].position;
        assert_relative_eq!(first.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(last.x, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_curvature_terminates_at_sharp_turn() {
        let handler = Corner { geometry: grid() };
        let masks = TrackingMasks::new();
        let config = TrackingConfig::default().with_step_size(1.0);
        let propagator = Propagator::new(&handler, &masks, &config).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let streamline = propagator.track(&Vector3::new(2.0, 5.0, 5.0), &mut rng).unwrap();
        assert_eq!(streamline.forward_termination(), Termination::Curvature);
        for pair in streamline.points().windows(2) {
            assert!(pair[0].direction.angle_deg(&pair[1].direction) <= 45.0);
        }

        let unchecked = TrackingConfig::default()
            .with_step_size(1.0)
            .with_curvature_check(false);
        let propagator = Propagator::new(&handler, &masks, &unchecked).unwrap();
        let streamline = propagator.track(&Vector3::new(2.0, 5.0, 5.0), &mut rng).unwrap();
        assert_eq!(streamline.forward_termination(), Termination::Boundary);
    }

    #[test]
    fn test_max_length() {
        let handler = uniform_x();
        let masks = TrackingMasks::new();
        let config = TrackingConfig::default()
            .with_step_size(1.0)
            .with_tract_length(0.0, 2.0);
        let propagator = Propagator::new(&handler, &masks, &config).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let streamline = propagator.track(&Vector3::new(5.0, 5.0, 5.0), &mut rng).unwrap();
        assert_eq!(propagator.max_steps(), 2);
        assert_eq!(streamline.len(), 5);
        assert_eq!(streamline.forward_termination(), Termination::MaxLength);
    }

    #[test]
    fn test_stop_mask_everywhere() {
        let handler = uniform_x();
        let masks = TrackingMasks::new().with_stop(Mask::filled(grid(), 1));
        let propagator = Propagator::new(&handler, &masks, &TrackingConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let streamline = propagator.track(&Vector3::new(5.0, 5.0, 5.0), &mut rng).unwrap();
        assert!(streamline.is_degenerate());
        assert_eq!(streamline.backward_termination(), Termination::Boundary);
        assert_eq!(streamline.forward_termination(), Termination::Boundary);
    }

    #[test]
    fn test_tracking_mask_bounds_streamline() {
        let handler = uniform_x();
        let tracking = Mask::from_fn(grid(), |[x, _, _]| u8::from((3..=7).contains(&x)));
        let masks = TrackingMasks::new().with_tracking(tracking);
        let config = TrackingConfig::default().with_step_size(1.0);
        let propagator = Propagator::new(&handler, &masks, &config).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let streamline = propagator.track(&Vector3::new(5.0, 5.0, 5.0), &mut rng).unwrap();
        let xs: Vec<f64> = streamline.positions().map(|p| p.x).collect();
        assert_eq!(xs, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_gray_matter_after_white_matter_stops() {
        let handler = uniform_x();
        // Gray | white | gray along X.
        let tissue = Mask::from_fn(grid(), |[x, _, _]| match x {
            0..=2 | 8..=10 => TissueType::Gray.label(),
            _ => TissueType::White.label(),
        });
        let masks = TrackingMasks::new().with_tissue(tissue);
        let config = TrackingConfig::default()
            .with_step_size(1.0)
            .with_seed_only_gm(true);
        let propagator = Propagator::new(&handler, &masks, &config).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let streamline = propagator.track(&Vector3::new(5.0, 5.0, 5.0), &mut rng).unwrap();
        let xs: Vec<f64> = streamline.positions().map(|p| p.x).collect();
        assert_eq!(xs, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(streamline.forward_termination(), Termination::Stop);
    }

    #[test]
    fn test_no_initial_direction_discards_seed() {
        let handler = uniform_x();
        let masks = TrackingMasks::new();
        let propagator = Propagator::new(&handler, &masks, &TrackingConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(propagator.track(&Vector3::new(-5.0, 0.0, 0.0), &mut rng).is_none());
    }

    #[test]
    fn test_mask_grid_mismatch() {
        let handler = uniform_x();
        let other = VolumeGeometry::new([5, 5, 5], [1.0; 3], [0.0; 3]).unwrap();
        let masks = TrackingMasks::new().with_seed(Mask::filled(other, 1));
        let result = Propagator::new(&handler, &masks, &TrackingConfig::default());
        assert!(matches!(result, Err(Error::GeometryMismatch(_))));
    }

    #[test]
    fn test_gray_matter_seeding_requires_tissue() {
        let handler = uniform_x();
        let masks = TrackingMasks::new();
        let config = TrackingConfig::default().with_seed_only_gm(true);
        assert!(matches!(
            Propagator::new(&handler, &masks, &config),
            Err(Error::ConfigError(_))
        ));
    }
}
