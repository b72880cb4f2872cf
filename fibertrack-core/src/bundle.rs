//! Structure of Arrays (`SoA`) storage for fiber bundles.
//!
//! A `FiberBundle` stores all points of all fibers in three coordinate
//! columns, plus an offset column marking where each fiber starts. This
//! keeps a bundle of millions of points in four allocations and hands the
//! writer contiguous slices.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A bundle of polylines stored in Structure of Arrays (`SoA`) format.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FiberBundle {
    /// Columnar storage for X coordinates (mm).
    pub x: Vec<f32>,
    /// Columnar storage for Y coordinates (mm).
    pub y: Vec<f32>,
    /// Columnar storage for Z coordinates (mm).
    pub z: Vec<f32>,
    /// Start of each fiber in the coordinate columns; `offsets[len]` is the
    /// total number of points.
    pub offsets: Vec<usize>,
}

impl Default for FiberBundle {
    fn default() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            offsets: vec![0],
        }
    }
}

impl FiberBundle {
    /// Creates a new empty bundle with capacity for `points` points.
    #[must_use]
    pub fn with_capacity(fibers: usize, points: usize) -> Self {
        let mut offsets = Vec::with_capacity(fibers + 1);
        offsets.push(0);
        Self {
            x: Vec::with_capacity(points),
            y: Vec::with_capacity(points),
            z: Vec::with_capacity(points),
            offsets,
        }
    }

    /// Returns the number of fibers in the bundle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Returns true if the bundle holds no fibers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of points over all fibers.
    #[must_use]
    pub fn total_points(&self) -> usize {
        self.x.len()
    }

    /// Number of points of fiber `index`.
    #[must_use]
    pub fn fiber_len(&self, index: usize) -> usize {
        self.offsets[index + 1] - self.offsets[index]
    }

    /// Clears all fibers.
    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.z.clear();
        self.offsets.clear();
        self.offsets.push(0);
    }

    /// Appends one fiber.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push_fiber<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = Vector3<f64>>,
    {
        for p in points {
            self.x.push(p.x as f32);
            self.y.push(p.y as f32);
            self.z.push(p.z as f32);
        }
        self.offsets.push(self.x.len());
    }

    /// Appends all fibers from another bundle to this one.
    pub fn append(&mut self, other: &FiberBundle) {
        let base = self.x.len();
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.z.extend_from_slice(&other.z);
        self.offsets
            .extend(other.offsets.iter().skip(1).map(|offset| offset + base));
    }

    /// Points of fiber `index`.
    #[must_use]
    pub fn fiber(&self, index: usize) -> Vec<Vector3<f64>> {
        let range = self.offsets[index]..self.offsets[index + 1];
        range
            .map(|i| {
                Vector3::new(
                    f64::from(self.x[i]),
                    f64::from(self.y[i]),
                    f64::from(self.z[i]),
                )
            })
            .collect()
    }

    /// Iterates over the fibers as point lists.
    pub fn fibers(&self) -> impl Iterator<Item = Vec<Vector3<f64>>> + '_ {
        (0..self.len()).map(|index| self.fiber(index))
    }
}

impl FromIterator<Vec<Vector3<f64>>> for FiberBundle {
    fn from_iter<I: IntoIterator<Item = Vec<Vector3<f64>>>>(iter: I) -> Self {
        let mut bundle = FiberBundle::default();
        for fiber in iter {
            bundle.push_fiber(fiber);
        }
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiber_bundle_operations() {
        let mut bundle = FiberBundle::with_capacity(2, 10);
        assert!(bundle.is_empty());

        bundle.push_fiber(vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)]);
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.fiber_len(0), 2);

        bundle.push_fiber(vec![
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(0.0, 3.0, 0.5),
        ]);
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.total_points(), 5);
        assert_eq!(bundle.fiber(1)[2], Vector3::new(0.0, 3.0, 0.5));

        bundle.clear();
        assert!(bundle.is_empty());
        assert_eq!(bundle.total_points(), 0);
    }

    #[test]
    fn test_append_shifts_offsets() {
        let mut a: FiberBundle = vec![vec![Vector3::zeros(), Vector3::x()]].into_iter().collect();
        let b: FiberBundle = vec![
            vec![Vector3::y(), Vector3::z()],
            vec![Vector3::x(), Vector3::y(), Vector3::z()],
        ]
        .into_iter()
        .collect();

        a.append(&b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.offsets, vec![0, 2, 4, 7]);
        assert_eq!(a.fiber(2), vec![Vector3::x(), Vector3::y(), Vector3::z()]);
    }
}
