//! Streamline points, propagation states and assembled streamlines.

use crate::geometry::Direction;
use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Why a half-streamline stopped growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Termination {
    /// No valid direction (low confidence, stop votes, tissue boundary).
    Stop,
    /// Left the volume or the tracking mask, or entered a stop region.
    Boundary,
    /// Direction change exceeded the angular threshold.
    Curvature,
    /// Step budget exhausted.
    MaxLength,
}

/// State of a half-streamline in the propagation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationState {
    /// Created at a seed, no step taken yet.
    Seeded,
    /// Growing.
    Propagating,
    /// Finished.
    Terminated(Termination),
}

impl PropagationState {
    /// Returns true once the half-streamline has stopped.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }

    /// Termination reason, if terminated.
    #[must_use]
    pub fn termination(&self) -> Option<Termination> {
        match self {
            Self::Terminated(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// A point of a streamline and the direction that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamlinePoint {
    /// Physical position (mm).
    pub position: Vector3<f64>,
    /// Propagation direction at this point, in polyline order.
    pub direction: Direction,
}

impl StreamlinePoint {
    /// Creates a point.
    #[inline]
    #[must_use]
    pub fn new(position: Vector3<f64>, direction: Direction) -> Self {
        Self {
            position,
            direction,
        }
    }
}

/// A streamline assembled from two half-streamlines grown from one seed.
#[derive(Debug, Clone, PartialEq)]
pub struct Streamline {
    points: Vec<StreamlinePoint>,
    seed_index: usize,
    backward: Termination,
    forward: Termination,
}

impl Streamline {
    /// Joins two halves at the seed.
    ///
    /// `backward` holds the points grown along the reversed initial
    /// direction, in growth order (nearest to the seed first); their
    /// directions are reversed so every stored direction follows the final
    /// polyline order.
    #[must_use]
    pub fn join(
        seed: StreamlinePoint,
        backward: &[StreamlinePoint],
        backward_end: Termination,
        forward: &[StreamlinePoint],
        forward_end: Termination,
    ) -> Self {
        let mut points = Vec::with_capacity(backward.len() + forward.len() + 1);
        points.extend(
            backward
                .iter()
                .rev()
                .map(|p| StreamlinePoint::new(p.position, -p.direction)),
        );
        let seed_index = points.len();
        points.push(seed);
        points.extend_from_slice(forward);
        Self {
            points,
            seed_index,
            backward: backward_end,
            forward: forward_end,
        }
    }

    /// Points in polyline order.
    #[must_use]
    pub fn points(&self) -> &[StreamlinePoint] {
        &self.points
    }

    /// Index of the seed point.
    #[must_use]
    pub fn seed_index(&self) -> usize {
        self.seed_index
    }

    /// Seed point.
    #[must_use]
    pub fn seed(&self) -> &StreamlinePoint {
        &self.points[self.seed_index]
    }

    /// Termination of the backward half (start of the polyline).
    #[must_use]
    pub fn backward_termination(&self) -> Termination {
        self.backward
    }

    /// Termination of the forward half (end of the polyline).
    #[must_use]
    pub fn forward_termination(&self) -> Termination {
        self.forward
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the streamline has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns true if the streamline has fewer than two points.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 2
    }

    /// Positions in polyline order.
    pub fn positions(&self) -> impl Iterator<Item = Vector3<f64>> + '_ {
        self.points.iter().map(|p| p.position)
    }

    /// Arc length (mm).
    #[must_use]
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| (pair[1].position - pair[0].position).norm())
            .sum()
    }
}
