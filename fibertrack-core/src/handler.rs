//! Direction-estimation traits and shared handler options.

use crate::geometry::{Direction, Flip, VolumeGeometry};
use crate::volume::Interpolation;
use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Result of one direction query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
    /// Proposed propagation direction, `None` if the handler sees no fiber.
    pub direction: Option<Direction>,
    /// Confidence behind the answer (FA, peak amplitude, class weight).
    pub confidence: f64,
}

impl Proposal {
    /// A proposal carrying a direction.
    #[inline]
    #[must_use]
    pub fn new(direction: Direction, confidence: f64) -> Self {
        Self {
            direction: Some(direction),
            confidence,
        }
    }

    /// A "no direction" answer with the confidence that caused it.
    #[inline]
    #[must_use]
    pub fn none(confidence: f64) -> Self {
        Self {
            direction: None,
            confidence,
        }
    }

    /// Returns true if a direction was proposed.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.direction.is_some()
    }
}

/// Options shared by every handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HandlerOptions {
    /// Reconstruction used for every volume lookup.
    pub interpolation: Interpolation,
    /// Sign flips applied to data-derived directions.
    pub flip: Flip,
}

impl HandlerOptions {
    /// Creates options with trilinear interpolation and no flips.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interpolation mode.
    #[must_use]
    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Sets the axis flips.
    #[must_use]
    pub fn with_flip(mut self, flip: Flip) -> Self {
        self.flip = flip;
        self
    }
}

/// Trait for direction-estimation strategies.
///
/// A handler is built once, fully configured, and is then queried
/// concurrently by every streamline task. Implementations must not mutate
/// shared state while answering queries.
pub trait TrackingHandler: Send + Sync {
    /// Returns the name of the strategy.
    fn name(&self) -> &'static str;

    /// Grid of the handler's input data; masks must share it.
    fn geometry(&self) -> &VolumeGeometry;

    /// Proposes a propagation direction at `position`.
    ///
    /// `previous` is the direction of the last step, `None` at a seed. A
    /// returned direction is sign-aligned with `previous` when one is given.
    /// Positions outside the handler's volume yield no direction.
    fn propose(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Proposal;
}

impl<T: TrackingHandler + ?Sized> TrackingHandler for &T {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn geometry(&self) -> &VolumeGeometry {
        (**self).geometry()
    }

    fn propose(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Proposal {
        (**self).propose(position, previous)
    }
}

/// Aligns `direction` with `previous` when one is given.
#[inline]
#[must_use]
pub fn align_to_previous(direction: Direction, previous: Option<&Direction>) -> Direction {
    match previous {
        Some(previous) => direction.aligned_with(previous),
        None => direction,
    }
}
