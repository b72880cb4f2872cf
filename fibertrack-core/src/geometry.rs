//! Physical-space geometry: directions, axis flips and voxel grids.

use crate::{Error, Result};
use nalgebra::{Matrix3, Vector3};
use std::ops::Neg;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Norm below which a vector carries no usable direction.
pub const MIN_DIRECTION_NORM: f64 = 1e-6;

/// A unit 3-vector in physical space.
///
/// Can only be built from a finite vector with a non-negligible norm, so
/// holding a `Direction` means holding a usable propagation direction.
/// "No direction" is expressed as `Option::<Direction>::None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Direction(Vector3<f64>);

impl Direction {
    /// Normalizes `v`; returns `None` for zero-length or non-finite vectors.
    #[must_use]
    pub fn new(v: Vector3<f64>) -> Option<Self> {
        let norm = v.norm();
        if !norm.is_finite() || norm < MIN_DIRECTION_NORM {
            return None;
        }
        Some(Self(v / norm))
    }

    /// Normalizes the vector `(x, y, z)`.
    #[must_use]
    pub fn from_xyz(x: f64, y: f64, z: f64) -> Option<Self> {
        Self::new(Vector3::new(x, y, z))
    }

    /// Returns the underlying unit vector.
    #[inline]
    #[must_use]
    pub fn as_vector(&self) -> &Vector3<f64> {
        &self.0
    }

    /// Returns the X component.
    #[inline]
    #[must_use]
    pub fn x(&self) -> f64 {
        self.0.x
    }

    /// Returns the Y component.
    #[inline]
    #[must_use]
    pub fn y(&self) -> f64 {
        self.0.y
    }

    /// Returns the Z component.
    #[inline]
    #[must_use]
    pub fn z(&self) -> f64 {
        self.0.z
    }

    /// Dot product with another direction.
    #[inline]
    #[must_use]
    pub fn dot(&self, other: &Direction) -> f64 {
        self.0.dot(&other.0)
    }

    /// Angle to another direction in degrees, in `[0, 180]`.
    #[must_use]
    pub fn angle_deg(&self, other: &Direction) -> f64 {
        self.dot(other).clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Returns this direction or its reverse, whichever points along `reference`.
    #[inline]
    #[must_use]
    pub fn aligned_with(self, reference: &Direction) -> Self {
        if self.dot(reference) < 0.0 {
            -self
        } else {
            self
        }
    }

    /// Displacement of length `length` along this direction.
    #[inline]
    #[must_use]
    pub fn scaled(&self, length: f64) -> Vector3<f64> {
        self.0 * length
    }
}

impl Neg for Direction {
    type Output = Direction;

    fn neg(self) -> Self::Output {
        Direction(-self.0)
    }
}

/// Per-axis sign flips applied to data-derived directions.
///
/// Fixes orientation conventions that differ between the tool that wrote
/// the data and the scanner frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Flip {
    /// Negate the X component.
    pub x: bool,
    /// Negate the Y component.
    pub y: bool,
    /// Negate the Z component.
    pub z: bool,
}

impl Flip {
    /// Creates a flip transform.
    #[must_use]
    pub fn new(x: bool, y: bool, z: bool) -> Self {
        Self { x, y, z }
    }

    /// Returns true if no axis is flipped.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        !(self.x || self.y || self.z)
    }

    fn signs(&self) -> Vector3<f64> {
        let sign = |flip: bool| if flip { -1.0 } else { 1.0 };
        Vector3::new(sign(self.x), sign(self.y), sign(self.z))
    }

    /// Applies the flips to a vector.
    #[must_use]
    pub fn apply(&self, v: &Vector3<f64>) -> Vector3<f64> {
        v.component_mul(&self.signs())
    }

    /// Applies the flips to a symmetric matrix (`F·M·F`).
    #[must_use]
    pub fn apply_matrix(&self, m: &Matrix3<f64>) -> Matrix3<f64> {
        let f = Matrix3::from_diagonal(&self.signs());
        f * m * f
    }
}

/// Regular voxel grid placed in physical space.
///
/// Voxel `(i, j, k)` has its center at `origin + A·(i, j, k)` where `A` is
/// the index-to-world matrix (voxel axes scaled by spacing). A voxel covers
/// index coordinates `[i - 0.5, i + 0.5)` along each axis.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeGeometry {
    dims: [usize; 3],
    index_to_world: Matrix3<f64>,
    world_to_index: Matrix3<f64>,
    origin: Vector3<f64>,
}

impl VolumeGeometry {
    /// Creates an axis-aligned grid.
    pub fn new(dims: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> Result<Self> {
        let linear = Matrix3::from_diagonal(&Vector3::new(spacing[0], spacing[1], spacing[2]));
        Self::from_affine(dims, linear, Vector3::new(origin[0], origin[1], origin[2]))
    }

    /// Creates a grid from an index-to-world linear map and an origin.
    pub fn from_affine(
        dims: [usize; 3],
        index_to_world: Matrix3<f64>,
        origin: Vector3<f64>,
    ) -> Result<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(Error::InvalidVolume(format!(
                "grid dimensions must be non-zero, got {dims:?}"
            )));
        }
        if index_to_world.iter().any(|v| !v.is_finite()) || origin.iter().any(|v| !v.is_finite())
        {
            return Err(Error::InvalidVolume(
                "grid affine contains non-finite values".to_string(),
            ));
        }
        let world_to_index = index_to_world.try_inverse().ok_or_else(|| {
            Error::InvalidVolume("grid affine is not invertible".to_string())
        })?;
        Ok(Self {
            dims,
            index_to_world,
            world_to_index,
            origin,
        })
    }

    /// Grid dimensions `(nx, ny, nz)`.
    #[inline]
    #[must_use]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Total number of voxels.
    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Voxel spacing along each index axis (mm).
    #[must_use]
    pub fn spacing(&self) -> [f64; 3] {
        [
            self.index_to_world.column(0).norm(),
            self.index_to_world.column(1).norm(),
            self.index_to_world.column(2).norm(),
        ]
    }

    /// Smallest voxel spacing (mm).
    #[must_use]
    pub fn min_spacing(&self) -> f64 {
        let [sx, sy, sz] = self.spacing();
        sx.min(sy).min(sz)
    }

    /// Physical position of voxel `(0, 0, 0)`.
    #[must_use]
    pub fn origin(&self) -> &Vector3<f64> {
        &self.origin
    }

    /// Index-to-world linear map.
    #[must_use]
    pub fn index_to_world_matrix(&self) -> &Matrix3<f64> {
        &self.index_to_world
    }

    /// Maps a continuous index to a physical position.
    #[inline]
    #[must_use]
    pub fn index_to_world(&self, index: &Vector3<f64>) -> Vector3<f64> {
        self.origin + self.index_to_world * index
    }

    /// Physical position of a voxel center.
    #[inline]
    #[must_use]
    pub fn voxel_center(&self, voxel: [usize; 3]) -> Vector3<f64> {
        #[allow(clippy::cast_precision_loss)]
        let index = Vector3::new(voxel[0] as f64, voxel[1] as f64, voxel[2] as f64);
        self.index_to_world(&index)
    }

    /// Maps a physical position to a continuous index.
    #[inline]
    #[must_use]
    pub fn world_to_index(&self, position: &Vector3<f64>) -> Vector3<f64> {
        self.world_to_index * (position - self.origin)
    }

    /// Voxel containing `position`, or `None` outside the grid.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn nearest_voxel(&self, position: &Vector3<f64>) -> Option<[usize; 3]> {
        let index = self.world_to_index(position);
        let mut voxel = [0usize; 3];
        for axis in 0..3 {
            let rounded = (index[axis] + 0.5).floor();
            if !rounded.is_finite() || rounded < 0.0 || rounded >= self.dims[axis] as f64 {
                return None;
            }
            voxel[axis] = rounded as usize;
        }
        Some(voxel)
    }

    /// Returns true if `position` lies inside the grid's physical bounds.
    #[inline]
    #[must_use]
    pub fn contains(&self, position: &Vector3<f64>) -> bool {
        self.nearest_voxel(position).is_some()
    }

    /// Row-major linear index of a voxel (z fastest).
    #[inline]
    #[must_use]
    pub fn linear_index(&self, voxel: [usize; 3]) -> usize {
        (voxel[0] * self.dims[1] + voxel[1]) * self.dims[2] + voxel[2]
    }

    /// Inverse of [`linear_index`](Self::linear_index).
    #[must_use]
    pub fn voxel_from_linear(&self, index: usize) -> [usize; 3] {
        let z = index % self.dims[2];
        let y = (index / self.dims[2]) % self.dims[1];
        let x = index / (self.dims[1] * self.dims[2]);
        [x, y, z]
    }

    /// Returns true if both grids have the same dimensions and placement.
    #[must_use]
    pub fn same_grid(&self, other: &VolumeGeometry, tolerance: f64) -> bool {
        self.dims == other.dims
            && (self.index_to_world - other.index_to_world).amax() <= tolerance
            && (self.origin - other.origin).amax() <= tolerance
    }

    /// Fails with [`Error::GeometryMismatch`] unless both grids match.
    pub fn ensure_same_grid(&self, other: &VolumeGeometry, what: &str) -> Result<()> {
        if self.same_grid(other, 1e-4) {
            Ok(())
        } else {
            Err(Error::GeometryMismatch(format!(
                "{what} grid {:?} does not match reference grid {:?}",
                other.dims, self.dims
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_direction_rejects_degenerate_vectors() {
        assert!(Direction::from_xyz(0.0, 0.0, 0.0).is_none());
        assert!(Direction::from_xyz(1e-9, 0.0, 0.0).is_none());
        assert!(Direction::from_xyz(f64::NAN, 1.0, 0.0).is_none());
        assert!(Direction::from_xyz(f64::INFINITY, 1.0, 0.0).is_none());
    }

    #[test]
    fn test_direction_is_unit_length() {
        let d = Direction::from_xyz(3.0, 4.0, 0.0).unwrap();
        assert_relative_eq!(d.as_vector().norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(d.x(), 0.6, epsilon = 1e-12);
        assert_relative_eq!(d.y(), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_direction_alignment_and_angle() {
        let x = Direction::from_xyz(1.0, 0.0, 0.0).unwrap();
        let back = Direction::from_xyz(-1.0, 0.1, 0.0).unwrap();
        let aligned = back.aligned_with(&x);
        assert!(aligned.dot(&x) > 0.0);
        assert_relative_eq!(x.angle_deg(&(-x)), 180.0, epsilon = 1e-9);
        let diag = Direction::from_xyz(1.0, 1.0, 0.0).unwrap();
        assert_relative_eq!(x.angle_deg(&diag), 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_flip_apply() {
        let flip = Flip::new(true, false, true);
        let v = flip.apply(&Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(v, Vector3::new(-1.0, 2.0, -3.0));
        assert!(Flip::default().is_identity());

        let m = Matrix3::new(1.0, 0.5, 0.2, 0.5, 2.0, 0.3, 0.2, 0.3, 3.0);
        let flipped = flip.apply_matrix(&m);
        assert_relative_eq!(flipped[(0, 1)], -0.5);
        assert_relative_eq!(flipped[(0, 2)], 0.2);
        assert_relative_eq!(flipped[(1, 2)], -0.3);
        assert_relative_eq!(flipped[(2, 2)], 3.0);
    }

    #[test]
    fn test_geometry_round_trip_and_bounds() {
        let geometry = VolumeGeometry::new([10, 20, 30], [2.0, 1.0, 0.5], [-5.0, 0.0, 1.0]).unwrap();
        let center = geometry.voxel_center([3, 4, 5]);
        assert_relative_eq!(center.x, 1.0);
        assert_relative_eq!(center.y, 4.0);
        assert_relative_eq!(center.z, 3.5);
        assert_eq!(geometry.nearest_voxel(&center), Some([3, 4, 5]));

        // Half a voxel below the first center is still inside.
        assert!(geometry.contains(&Vector3::new(-5.9, 0.0, 1.0)));
        assert!(!geometry.contains(&Vector3::new(-6.1, 0.0, 1.0)));
        assert_relative_eq!(geometry.min_spacing(), 0.5);
    }

    #[test]
    fn test_linear_index_round_trip() {
        let geometry = VolumeGeometry::new([4, 5, 6], [1.0; 3], [0.0; 3]).unwrap();
        for index in [0, 7, 59, 119] {
            let voxel = geometry.voxel_from_linear(index);
            assert_eq!(geometry.linear_index(voxel), index);
        }
    }

    #[test]
    fn test_rejects_singular_affine() {
        let result = VolumeGeometry::from_affine([2, 2, 2], Matrix3::zeros(), Vector3::zeros());
        assert!(result.is_err());
        assert!(VolumeGeometry::new([0, 2, 2], [1.0; 3], [0.0; 3]).is_err());
    }
}
