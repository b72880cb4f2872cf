//! Diffusion-tensor direction estimation.
//!
//! Follows the principal eigenvector of one or more tensor fields, optionally
//! deflecting the previous direction by the local tensor (tensor deflection).
//! Eigen-decompositions and FA are computed per voxel when the handler is
//! built, so queries only interpolate precomputed values.

use crate::axial::AxialSum;
use fibertrack_core::geometry::{Direction, VolumeGeometry};
use fibertrack_core::handler::{align_to_previous, HandlerOptions, Proposal, TrackingHandler};
use fibertrack_core::volume::{Corners, Interpolation, Volume};
use fibertrack_core::{Error, Result};
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rayon::prelude::*;

/// Components of a tensor voxel, in `xx, xy, xz, yy, yz, zz` order.
pub const TENSOR_COMPONENTS: usize = 6;

/// Tensor-specific configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorConfig {
    /// FA below which no direction is proposed.
    pub cutoff: f64,
    /// Weight of the principal eigenvector (1 = pure eigenvector following).
    pub tend_f: f64,
    /// Weight of the deflected previous direction against the undeflected one.
    pub tend_g: f64,
    /// Interpolation and flips.
    pub options: HandlerOptions,
}

impl Default for TensorConfig {
    fn default() -> Self {
        Self {
            cutoff: 0.1,
            tend_f: 1.0,
            tend_g: 0.0,
            options: HandlerOptions::default(),
        }
    }
}

impl TensorConfig {
    /// Sets the FA cutoff.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Sets the tensor deflection weights.
    #[must_use]
    pub fn with_tend(mut self, f: f64, g: f64) -> Self {
        self.tend_f = f;
        self.tend_g = g;
        self
    }

    /// Sets the shared handler options.
    #[must_use]
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }
}

/// Builds the symmetric tensor from its six unique components.
#[must_use]
pub fn tensor_matrix(c: &[f64]) -> Matrix3<f64> {
    Matrix3::new(c[0], c[1], c[2], c[1], c[3], c[4], c[2], c[4], c[5])
}

/// Fractional anisotropy of a set of eigenvalues.
#[must_use]
pub fn fractional_anisotropy(eigenvalues: &Vector3<f64>) -> f64 {
    let [l1, l2, l3] = [eigenvalues.x, eigenvalues.y, eigenvalues.z];
    let norm2 = l1 * l1 + l2 * l2 + l3 * l3;
    if !norm2.is_finite() || norm2 <= f64::EPSILON {
        return 0.0;
    }
    let spread = (l1 - l2).powi(2) + (l2 - l3).powi(2) + (l3 - l1).powi(2);
    (0.5 * spread / norm2).sqrt().clamp(0.0, 1.0)
}

/// Principal eigenvector and FA of a tensor; zeros for degenerate tensors.
#[must_use]
pub fn principal_direction(tensor: &Matrix3<f64>) -> (Vector3<f64>, f64) {
    if tensor.iter().any(|v| !v.is_finite()) {
        return (Vector3::zeros(), 0.0);
    }
    let eigen = SymmetricEigen::new(*tensor);
    let fa = fractional_anisotropy(&eigen.eigenvalues);
    if fa <= 0.0 {
        return (Vector3::zeros(), 0.0);
    }
    let principal = eigen.eigenvalues.imax();
    (eigen.eigenvectors.column(principal).into_owned(), fa)
}

/// Per-voxel eigen-decomposition of one tensor field.
struct Eigenfield {
    tensors: Volume,
    principal: Vec<Vector3<f64>>,
    fa: Vec<f64>,
}

impl Eigenfield {
    fn new(tensors: Volume, options: &HandlerOptions) -> Self {
        let geometry = tensors.geometry().clone();
        let (principal, fa): (Vec<_>, Vec<_>) = (0..geometry.voxel_count())
            .into_par_iter()
            .map(|index| {
                let voxel = geometry.voxel_from_linear(index);
                let components: Vec<f64> =
                    tensors.voxel(voxel).iter().map(|&v| f64::from(v)).collect();
                let tensor = options.flip.apply_matrix(&tensor_matrix(&components));
                principal_direction(&tensor)
            })
            .unzip();
        Self {
            tensors,
            principal,
            fa,
        }
    }
}

/// Tensor tracking handler.
pub struct TensorHandler {
    geometry: VolumeGeometry,
    fields: Vec<Eigenfield>,
    fa_image: Option<Volume>,
    config: TensorConfig,
}

impl TensorHandler {
    /// Builds the handler and precomputes eigenvectors and FA.
    ///
    /// All tensor volumes (and the FA image, if given) must share one grid.
    pub fn new(tensors: Vec<Volume>, fa_image: Option<Volume>, config: TensorConfig) -> Result<Self> {
        let Some(first) = tensors.first() else {
            return Err(Error::ConfigError(
                "tensor tracking needs at least one tensor volume".to_string(),
            ));
        };
        let geometry = first.geometry().clone();
        for (index, volume) in tensors.iter().enumerate() {
            if volume.components() != TENSOR_COMPONENTS {
                return Err(Error::InvalidVolume(format!(
                    "tensor volume {index} has {} components, expected {TENSOR_COMPONENTS}",
                    volume.components()
                )));
            }
            geometry.ensure_same_grid(volume.geometry(), "tensor volume")?;
        }
        if let Some(fa) = &fa_image {
            if fa.components() != 1 {
                return Err(Error::InvalidVolume(format!(
                    "FA image has {} components, expected 1",
                    fa.components()
                )));
            }
            geometry.ensure_same_grid(fa.geometry(), "FA image")?;
        }
        for (name, weight) in [("tend_f", config.tend_f), ("tend_g", config.tend_g)] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(Error::ConfigError(format!(
                    "{name} must be in [0, 1], got {weight}"
                )));
            }
        }

        log::debug!(
            "Precomputing eigenvectors for {} tensor volume(s) of {:?}",
            tensors.len(),
            geometry.dims()
        );
        let fields = tensors
            .into_iter()
            .map(|volume| Eigenfield::new(volume, &config.options))
            .collect();

        Ok(Self {
            geometry,
            fields,
            fa_image,
            config,
        })
    }

    /// Handler configuration.
    #[must_use]
    pub fn config(&self) -> &TensorConfig {
        &self.config
    }

    /// Principal direction and FA of one field at `position`.
    fn field_direction(
        &self,
        field: &Eigenfield,
        position: &Vector3<f64>,
        previous: Option<&Direction>,
    ) -> Option<(Option<Direction>, f64)> {
        match self.config.options.interpolation {
            Interpolation::Nearest => {
                let voxel = self.geometry.nearest_voxel(position)?;
                let index = self.geometry.linear_index(voxel);
                Some((Direction::new(field.principal[index]), field.fa[index]))
            }
            Interpolation::Trilinear => {
                let corners = Corners::around(&self.geometry, position)?;
                let mut sum = AxialSum::new(previous);
                let mut fa = 0.0;
                for (voxel, weight) in corners.iter() {
                    let index = self.geometry.linear_index(voxel);
                    sum.add(&field.principal[index], weight);
                    fa += weight * field.fa[index];
                }
                Some((sum.direction(), fa))
            }
        }
    }

    /// Mean interpolated tensor at `position` with flips applied.
    #[allow(clippy::cast_precision_loss)]
    fn local_tensor(&self, position: &Vector3<f64>) -> Option<Matrix3<f64>> {
        let mut components = [0.0; TENSOR_COMPONENTS];
        let mut tensor = Matrix3::zeros();
        for field in &self.fields {
            if !field
                .tensors
                .sample(position, self.config.options.interpolation, &mut components)
            {
                return None;
            }
            tensor += tensor_matrix(&components);
        }
        let mean = tensor / self.fields.len() as f64;
        Some(self.config.options.flip.apply_matrix(&mean))
    }

    /// Blends the eigenvector with the (deflected) previous direction.
    fn deflect(&self, e1: Direction, previous: &Direction, position: &Vector3<f64>) -> Option<Direction> {
        let TensorConfig { tend_f: f, tend_g: g, .. } = self.config;
        if f >= 1.0 {
            return Some(e1);
        }
        let prev = previous.as_vector();
        let deflected = self
            .local_tensor(position)
            .and_then(|tensor| Direction::new(tensor * prev))
            .map_or(*prev, |d| *d.aligned_with(previous).as_vector());
        let blended = e1.scaled(f) + (prev * (1.0 - g) + deflected * g) * (1.0 - f);
        Direction::new(blended)
    }
}

impl TrackingHandler for TensorHandler {
    fn name(&self) -> &'static str {
        "Tensor"
    }

    fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    #[allow(clippy::cast_precision_loss)]
    fn propose(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Proposal {
        let mut sum = AxialSum::new(previous);
        let mut fa_sum = 0.0;
        for field in &self.fields {
            let Some((direction, fa)) = self.field_direction(field, position, previous) else {
                return Proposal::none(0.0);
            };
            if let Some(direction) = direction {
                sum.add(direction.as_vector(), 1.0);
            }
            fa_sum += fa;
        }

        let fa = match &self.fa_image {
            Some(image) => image
                .sample_scalar(position, self.config.options.interpolation)
                .unwrap_or(0.0),
            None => fa_sum / self.fields.len() as f64,
        };
        if !fa.is_finite() {
            return Proposal::none(0.0);
        }
        if fa < self.config.cutoff {
            return Proposal::none(fa);
        }

        let Some(e1) = sum.direction() else {
            return Proposal::none(fa);
        };
        let direction = match previous {
            Some(previous) => self.deflect(align_to_previous(e1, Some(previous)), previous, position),
            None => Some(e1),
        };
        match direction {
            Some(direction) => Proposal::new(align_to_previous(direction, previous), fa),
            None => Proposal::none(fa),
        }
    }
}
