//! Weighted sums of axial (sign-free) directions.

use fibertrack_core::geometry::{Direction, MIN_DIRECTION_NORM};
use nalgebra::Vector3;

/// Accumulates orientations after flipping each one onto a common
/// hemisphere.
///
/// The hemisphere is given by the reference direction if one is supplied,
/// otherwise by the first non-zero vector added.
#[derive(Debug, Clone)]
pub(crate) struct AxialSum {
    sum: Vector3<f64>,
    reference: Option<Vector3<f64>>,
    weight: f64,
}

impl AxialSum {
    pub(crate) fn new(reference: Option<&Direction>) -> Self {
        Self {
            sum: Vector3::zeros(),
            reference: reference.map(|d| *d.as_vector()),
            weight: 0.0,
        }
    }

    /// Adds `v` scaled by `weight`; zero-length vectors are ignored.
    pub(crate) fn add(&mut self, v: &Vector3<f64>, weight: f64) {
        if weight <= 0.0 || v.norm() < MIN_DIRECTION_NORM {
            return;
        }
        let reference = *self.reference.get_or_insert(*v);
        if v.dot(&reference) < 0.0 {
            self.sum -= v * weight;
        } else {
            self.sum += v * weight;
        }
        self.weight += weight;
    }

    /// Total weight added so far.
    pub(crate) fn weight(&self) -> f64 {
        self.weight
    }

    /// Normalized sum, `None` if nothing (or only cancelling vectors) was added.
    pub(crate) fn direction(&self) -> Option<Direction> {
        Direction::new(self.sum)
    }
}
