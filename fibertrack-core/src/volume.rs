//! Volumes and label masks on a voxel grid.
//!
//! A [`Volume`] stores `f32` samples in an `(x, y, z, component)` array:
//! one component for scalar maps, three per peak for peak images, six for
//! diffusion tensors, one per acquisition for diffusion-weighted images.
//! A [`Mask`] stores `u8` labels (binary masks and tissue-type images).

use crate::geometry::VolumeGeometry;
use crate::{Error, Result};
use nalgebra::Vector3;
use ndarray::{s, Array3, Array4, ArrayView1};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How volume values between voxel centers are reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Interpolation {
    /// Value of the voxel containing the position.
    Nearest,
    /// Weighted blend of the eight surrounding voxel centers.
    #[default]
    Trilinear,
}

/// The eight voxel centers around a position, with trilinear weights.
///
/// Near the border the out-of-grid corners are clamped onto the edge voxels,
/// so the weights always sum to one.
#[derive(Debug, Clone, Copy)]
pub struct Corners {
    voxels: [[usize; 3]; 8],
    weights: [f64; 8],
}

impl Corners {
    /// Computes the corners for `position`, or `None` outside the grid.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::needless_range_loop
    )]
    pub fn around(geometry: &VolumeGeometry, position: &Vector3<f64>) -> Option<Self> {
        if !geometry.contains(position) {
            return None;
        }
        let index = geometry.world_to_index(position);
        let dims = geometry.dims();

        let mut low = [0usize; 3];
        let mut high = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            let last = dims[axis] - 1;
            let floor = index[axis].floor();
            if floor < 0.0 {
                // Between the grid edge and the first voxel center.
                continue;
            }
            let base = (floor as usize).min(last);
            low[axis] = base;
            high[axis] = (base + 1).min(last);
            frac[axis] = index[axis] - floor;
        }

        let mut voxels = [[0usize; 3]; 8];
        let mut weights = [0.0f64; 8];
        for corner in 0..8 {
            let mut voxel = [0usize; 3];
            let mut weight = 1.0;
            for axis in 0..3 {
                if (corner >> axis) & 1 == 1 {
                    voxel[axis] = high[axis];
                    weight *= frac[axis];
                } else {
                    voxel[axis] = low[axis];
                    weight *= 1.0 - frac[axis];
                }
            }
            voxels[corner] = voxel;
            weights[corner] = weight;
        }
        Some(Self { voxels, weights })
    }

    /// Iterates over `(voxel, weight)` pairs with non-zero weight.
    pub fn iter(&self) -> impl Iterator<Item = ([usize; 3], f64)> + '_ {
        self.voxels
            .iter()
            .copied()
            .zip(self.weights.iter().copied())
            .filter(|&(_, weight)| weight > 0.0)
    }
}

/// A multi-component `f32` field over a voxel grid.
#[derive(Debug, Clone)]
pub struct Volume {
    geometry: VolumeGeometry,
    data: Array4<f32>,
}

impl Volume {
    /// Wraps an `(x, y, z, component)` array.
    pub fn new(geometry: VolumeGeometry, data: Array4<f32>) -> Result<Self> {
        let shape = data.shape();
        let dims = geometry.dims();
        if shape[..3] != dims[..] {
            return Err(Error::InvalidVolume(format!(
                "data shape {:?} does not match grid {dims:?}",
                &shape[..3]
            )));
        }
        if shape[3] == 0 {
            return Err(Error::InvalidVolume(
                "volume must have at least one component".to_string(),
            ));
        }
        Ok(Self { geometry, data })
    }

    /// Builds a volume from row-major values (component fastest, then z, y, x).
    pub fn from_vec(geometry: VolumeGeometry, components: usize, values: Vec<f32>) -> Result<Self> {
        let [nx, ny, nz] = geometry.dims();
        let expected = nx * ny * nz * components;
        if values.len() != expected {
            return Err(Error::InvalidVolume(format!(
                "expected {expected} values for {nx}x{ny}x{nz}x{components}, got {}",
                values.len()
            )));
        }
        let data = Array4::from_shape_vec((nx, ny, nz, components), values)
            .map_err(|e| Error::InvalidVolume(e.to_string()))?;
        Self::new(geometry, data)
    }

    /// Builds a volume by evaluating `f(voxel, component)` everywhere.
    pub fn from_fn<F>(geometry: VolumeGeometry, components: usize, f: F) -> Result<Self>
    where
        F: Fn([usize; 3], usize) -> f32,
    {
        let [nx, ny, nz] = geometry.dims();
        let data = Array4::from_shape_fn((nx, ny, nz, components), |(x, y, z, c)| f([x, y, z], c));
        Self::new(geometry, data)
    }

    /// Builds a volume with the same component values in every voxel.
    pub fn filled(geometry: VolumeGeometry, values: &[f32]) -> Result<Self> {
        Self::from_fn(geometry, values.len(), |_, c| values[c])
    }

    /// Grid of this volume.
    #[must_use]
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Number of components per voxel.
    #[must_use]
    pub fn components(&self) -> usize {
        self.data.shape()[3]
    }

    /// Raw `(x, y, z, component)` data.
    #[must_use]
    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Components of one voxel.
    #[inline]
    #[must_use]
    pub fn voxel(&self, voxel: [usize; 3]) -> ArrayView1<'_, f32> {
        self.data.slice(s![voxel[0], voxel[1], voxel[2], ..])
    }

    /// One component of one voxel.
    #[inline]
    #[must_use]
    pub fn value(&self, voxel: [usize; 3], component: usize) -> f32 {
        self.data[[voxel[0], voxel[1], voxel[2], component]]
    }

    /// Reconstructs all components at `position` into `out`.
    ///
    /// Returns false (leaving `out` unspecified) outside the grid.
    pub fn sample(
        &self,
        position: &Vector3<f64>,
        interpolation: Interpolation,
        out: &mut [f64],
    ) -> bool {
        debug_assert_eq!(out.len(), self.components());
        match interpolation {
            Interpolation::Nearest => {
                let Some(voxel) = self.geometry.nearest_voxel(position) else {
                    return false;
                };
                for (o, &v) in out.iter_mut().zip(self.voxel(voxel).iter()) {
                    *o = f64::from(v);
                }
            }
            Interpolation::Trilinear => {
                let Some(corners) = Corners::around(&self.geometry, position) else {
                    return false;
                };
                out.fill(0.0);
                for (voxel, weight) in corners.iter() {
                    for (o, &v) in out.iter_mut().zip(self.voxel(voxel).iter()) {
                        *o += weight * f64::from(v);
                    }
                }
            }
        }
        true
    }

    /// Reconstructs the first component at `position`.
    #[must_use]
    pub fn sample_scalar(&self, position: &Vector3<f64>, interpolation: Interpolation) -> Option<f64> {
        let mut out = vec![0.0; self.components()];
        self.sample(position, interpolation, &mut out)
            .then(|| out[0])
    }
}

/// Tissue labels of a five-tissue-type image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TissueType {
    /// Cortical gray matter.
    Gray = 1,
    /// White matter.
    White = 3,
}

impl TissueType {
    /// Label value used in the tissue image.
    #[must_use]
    pub const fn label(self) -> u8 {
        self as u8
    }
}

/// A `u8` label image: binary masks (non-zero = foreground) or tissue labels.
#[derive(Debug, Clone)]
pub struct Mask {
    geometry: VolumeGeometry,
    labels: Array3<u8>,
}

impl Mask {
    /// Wraps an `(x, y, z)` label array.
    pub fn new(geometry: VolumeGeometry, labels: Array3<u8>) -> Result<Self> {
        if labels.shape() != &geometry.dims()[..] {
            return Err(Error::InvalidVolume(format!(
                "mask shape {:?} does not match grid {:?}",
                labels.shape(),
                geometry.dims()
            )));
        }
        Ok(Self { geometry, labels })
    }

    /// Builds a mask by evaluating `f(voxel)` everywhere.
    pub fn from_fn<F>(geometry: VolumeGeometry, f: F) -> Self
    where
        F: Fn([usize; 3]) -> u8,
    {
        let [nx, ny, nz] = geometry.dims();
        let labels = Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| f([x, y, z]));
        Self { geometry, labels }
    }

    /// Builds a mask with the same label everywhere.
    #[must_use]
    pub fn filled(geometry: VolumeGeometry, label: u8) -> Self {
        Self::from_fn(geometry, |_| label)
    }

    /// Grid of this mask.
    #[must_use]
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Label of one voxel.
    #[inline]
    #[must_use]
    pub fn label(&self, voxel: [usize; 3]) -> u8 {
        self.labels[voxel]
    }

    /// Label of the voxel containing `position`, `None` outside the grid.
    #[inline]
    #[must_use]
    pub fn label_at(&self, position: &Vector3<f64>) -> Option<u8> {
        self.geometry
            .nearest_voxel(position)
            .map(|voxel| self.labels[voxel])
    }

    /// Returns true if `position` is inside the grid and in the foreground.
    #[inline]
    #[must_use]
    pub fn contains(&self, position: &Vector3<f64>) -> bool {
        self.label_at(position).is_some_and(|label| label > 0)
    }

    /// Foreground voxels in row-major order.
    #[must_use]
    pub fn foreground_voxels(&self) -> Vec<[usize; 3]> {
        self.labels
            .indexed_iter()
            .filter(|&(_, &label)| label > 0)
            .map(|((x, y, z), _)| [x, y, z])
            .collect()
    }

    /// Number of foreground voxels.
    #[must_use]
    pub fn foreground_count(&self) -> usize {
        self.labels.iter().filter(|&&label| label > 0).count()
    }
}
