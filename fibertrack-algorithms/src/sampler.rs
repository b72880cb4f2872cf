//! Neighborhood sampling around the current streamline point.
//!
//! Instead of trusting a single query, the sampler asks the handler at the
//! current point and at random points on a small sphere around it, sums the
//! valid answers and lets the samples vote on termination.

use crate::axial::AxialSum;
use fibertrack_core::config::TrackingConfig;
use fibertrack_core::geometry::Direction;
use fibertrack_core::handler::{align_to_previous, Proposal, TrackingHandler};
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::StandardNormal;

/// Uniformly distributed unit vector.
pub fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    loop {
        let v = Vector3::new(
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
        );
        if let Some(direction) = Direction::new(v) {
            return *direction.as_vector();
        }
    }
}

/// Queries a handler over a neighborhood of the current point.
pub struct NeighborhoodSampler<'a, H: TrackingHandler + ?Sized> {
    handler: &'a H,
    num_samples: usize,
    distance: f64,
    use_stop_votes: bool,
    only_forward: bool,
}

impl<'a, H: TrackingHandler + ?Sized> NeighborhoodSampler<'a, H> {
    /// Creates a sampler; the sampling distance is scaled by the smallest
    /// voxel spacing of the handler's grid.
    pub fn new(handler: &'a H, config: &TrackingConfig) -> Self {
        Self {
            handler,
            num_samples: config.num_samples,
            distance: config.sampling_distance_mm(handler.geometry()),
            use_stop_votes: config.use_stop_votes,
            only_forward: config.only_forward_samples,
        }
    }

    /// Wrapped handler.
    pub fn handler(&self) -> &'a H {
        self.handler
    }

    /// Sampling distance (mm).
    #[must_use]
    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Estimates the propagation direction at `position`.
    ///
    /// Without neighborhood samples this is exactly the handler's answer.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample<R: Rng + ?Sized>(
        &self,
        position: &Vector3<f64>,
        previous: Option<&Direction>,
        rng: &mut R,
    ) -> Proposal {
        if self.num_samples == 0 {
            return self.handler.propose(position, previous);
        }

        let mut sum = AxialSum::new(previous);
        let mut stop_votes = 0usize;
        let mut valid = 0usize;
        let mut confidence = 0.0;
        let mut vote = |proposal: Proposal| {
            confidence += proposal.confidence;
            match proposal.direction {
                Some(direction) => {
                    sum.add(direction.as_vector(), 1.0);
                    valid += 1;
                }
                None => stop_votes += 1,
            }
        };

        vote(self.handler.propose(position, previous));
        for _ in 0..self.num_samples {
            let mut offset = random_unit_vector(rng);
            if let Some(previous) = previous.filter(|_| self.only_forward) {
                if offset.dot(previous.as_vector()) < 0.0 {
                    offset = -offset;
                }
            }
            vote(self.handler.propose(&(position + offset * self.distance), previous));
        }

        let total = self.num_samples + 1;
        let confidence = confidence / total as f64;
        let stop = if self.use_stop_votes {
            stop_votes * 2 > total || valid == 0
        } else {
            valid == 0
        };
        if stop {
            return Proposal::none(confidence);
        }
        match sum.direction() {
            Some(direction) => Proposal::new(align_to_previous(direction, previous), confidence),
            None => Proposal::none(confidence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fibertrack_core::geometry::VolumeGeometry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Proposes +X for x < `edge`, nothing beyond.
    struct HalfSpace {
        geometry: VolumeGeometry,
        edge: f64,
    }

    impl TrackingHandler for HalfSpace {
        fn name(&self) -> &'static str {
            "HalfSpace"
        }

        fn geometry(&self) -> &VolumeGeometry {
            &self.geometry
        }

        fn propose(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Proposal {
            if position.x < self.edge {
                let d = Direction::from_xyz(1.0, 0.0, 0.0).unwrap();
                Proposal::new(align_to_previous(d, previous), 1.0)
            } else {
                Proposal::none(0.0)
            }
        }
    }

    fn handler(edge: f64) -> HalfSpace {
        HalfSpace {
            geometry: VolumeGeometry::new([10, 10, 10], [1.0; 3], [0.0; 3]).unwrap(),
            edge,
        }
    }

    #[test]
    fn test_random_unit_vectors() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert_relative_eq!(random_unit_vector(&mut rng).norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_no_samples_is_direct_query() {
        let h = handler(5.0);
        let sampler = NeighborhoodSampler::new(&h, &TrackingConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        let p = Vector3::new(2.0, 2.0, 2.0);
        assert_eq!(sampler.sample(&p, None, &mut rng), h.propose(&p, None));
        let q = Vector3::new(6.0, 2.0, 2.0);
        assert_eq!(sampler.sample(&q, None, &mut rng), h.propose(&q, None));
    }

    #[test]
    fn test_stop_votes_need_majority() {
        let h = handler(5.0);
        let config = TrackingConfig::default().with_neighborhood_sampling(20, 4.0);
        let sampler = NeighborhoodSampler::new(&h, &config);
        let mut rng = StdRng::seed_from_u64(9);
        let prev = Direction::from_xyz(1.0, 0.0, 0.0).unwrap();

        // Forward samples at distance 4 from x = 4.9 almost all land beyond
        // the edge, outvoting the valid center.
        let p = Vector3::new(4.9, 5.0, 5.0);
        assert!(sampler.sample(&p, Some(&prev), &mut rng).direction.is_none());

        // Well inside, every sample is valid.
        let q = Vector3::new(0.5, 5.0, 5.0);
        let d = sampler.sample(&q, Some(&prev), &mut rng).direction.unwrap();
        assert_relative_eq!(d.x(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_without_stop_votes_any_valid_sample_continues() {
        let h = handler(5.0);
        let config = TrackingConfig::default()
            .with_neighborhood_sampling(30, 2.0)
            .with_stop_votes(false)
            .with_only_forward_samples(false);
        let sampler = NeighborhoodSampler::new(&h, &config);
        let mut rng = StdRng::seed_from_u64(5);
        // Center is just beyond the edge; samples behind it are valid.
        let p = Vector3::new(5.2, 5.0, 5.0);
        assert!(sampler.sample(&p, None, &mut rng).direction.is_some());
    }

    #[test]
    fn test_forward_only_keeps_samples_ahead() {
        let h = handler(5.0);
        let config = TrackingConfig::default()
            .with_neighborhood_sampling(30, 2.0)
            .with_stop_votes(false);
        let sampler = NeighborhoodSampler::new(&h, &config);
        let mut rng = StdRng::seed_from_u64(5);
        let prev = Direction::from_xyz(1.0, 0.0, 0.0).unwrap();
        // Every sample lies at x >= 5.2, beyond the edge.
        let p = Vector3::new(5.2, 5.0, 5.0);
        assert!(sampler.sample(&p, Some(&prev), &mut rng).direction.is_none());
    }
}
