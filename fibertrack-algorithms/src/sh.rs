//! Real symmetric spherical-harmonic basis and regularized signal fitting.
//!
//! Only even orders are used, since diffusion signals are antipodally
//! symmetric. Coefficient `j` of order `l`, phase `m` (`-l <= m <= l`) sits
//! at `l(l-1)/2 + l + m`.

use fibertrack_core::geometry::Direction;
use fibertrack_core::{Error, Result};
use nalgebra::{DMatrix, Vector3};
use std::f64::consts::PI;

/// Maximum SH order used for classifier features.
pub const SH_ORDER: usize = 6;

/// Laplace-Beltrami regularization weight of the signal fit.
pub const SH_LAMBDA: f64 = 0.006;

/// Number of coefficients of an even-order basis up to `order`.
#[must_use]
pub fn num_coefficients(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

/// Associated Legendre function `P_l^m(x)` for `m >= 0`.
#[allow(clippy::cast_precision_loss)]
fn associated_legendre(l: usize, m: usize, x: f64) -> f64 {
    let mut pmm = 1.0;
    if m > 0 {
        let somx2 = ((1.0 - x) * (1.0 + x)).max(0.0).sqrt();
        let mut fact = 1.0;
        for _ in 0..m {
            pmm *= -fact * somx2;
            fact += 2.0;
        }
    }
    if l == m {
        return pmm;
    }
    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    if l == m + 1 {
        return pmmp1;
    }
    let mut pll = 0.0;
    for ll in (m + 2)..=l {
        pll = (x * (2 * ll - 1) as f64 * pmmp1 - (ll + m - 1) as f64 * pmm) / (ll - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }
    pll
}

/// Normalization `sqrt((2l+1)/(4π) · (l-m)!/(l+m)!)`.
#[allow(clippy::cast_precision_loss)]
fn normalization(l: usize, m: usize) -> f64 {
    let ratio: f64 = ((l - m + 1)..=(l + m)).map(|k| 1.0 / k as f64).product();
    ((2 * l + 1) as f64 / (4.0 * PI) * ratio).sqrt()
}

/// Evaluates the basis up to `order` at direction `v` into `out`.
#[allow(clippy::cast_precision_loss)]
pub fn basis_row(order: usize, v: &Vector3<f64>, out: &mut [f64]) {
    debug_assert_eq!(out.len(), num_coefficients(order));
    let norm = v.norm();
    let cos_theta = if norm > 0.0 { (v.z / norm).clamp(-1.0, 1.0) } else { 1.0 };
    let phi = v.y.atan2(v.x);
    let mut offset = 0;
    for l in (0..=order).step_by(2) {
        let center = offset + l;
        out[center] = normalization(l, 0) * associated_legendre(l, 0, cos_theta);
        for m in 1..=l {
            let k = std::f64::consts::SQRT_2 * normalization(l, m) * associated_legendre(l, m, cos_theta);
            let angle = m as f64 * phi;
            out[center + m] = k * angle.cos();
            out[center - m] = k * angle.sin();
        }
        offset += 2 * l + 1;
    }
}

/// Basis matrix with one row per direction.
#[must_use]
pub fn basis_matrix(order: usize, directions: &[Vector3<f64>]) -> DMatrix<f64> {
    let n = num_coefficients(order);
    let mut matrix = DMatrix::zeros(directions.len(), n);
    let mut row = vec![0.0; n];
    for (i, v) in directions.iter().enumerate() {
        basis_row(order, v, &mut row);
        for (j, value) in row.iter().enumerate() {
            matrix[(i, j)] = *value;
        }
    }
    matrix
}

/// Precomputed regularized least-squares fit of samples on the sphere.
#[derive(Debug, Clone)]
pub struct ShFit {
    order: usize,
    matrix: DMatrix<f64>,
}

impl ShFit {
    /// Builds `(BᵀB + λL)⁻¹Bᵀ` for the given sample directions.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(order: usize, directions: &[Direction], lambda: f64) -> Result<Self> {
        if order % 2 != 0 {
            return Err(Error::ConfigError(format!(
                "spherical-harmonic order must be even, got {order}"
            )));
        }
        if directions.is_empty() {
            return Err(Error::ConfigError(
                "spherical-harmonic fit needs at least one gradient direction".to_string(),
            ));
        }
        let vectors: Vec<Vector3<f64>> = directions.iter().map(|d| *d.as_vector()).collect();
        let b = basis_matrix(order, &vectors);
        let mut normal = b.transpose() * &b;
        let mut offset = 0;
        for l in (0..=order).step_by(2) {
            let penalty = lambda * ((l * l * (l + 1) * (l + 1)) as f64);
            for j in offset..offset + 2 * l + 1 {
                normal[(j, j)] += penalty;
            }
            offset += 2 * l + 1;
        }
        let inverse = normal.try_inverse().ok_or_else(|| {
            Error::ConfigError(format!(
                "spherical-harmonic fit is singular for {} directions",
                directions.len()
            ))
        })?;
        Ok(Self {
            order,
            matrix: inverse * b.transpose(),
        })
    }

    /// Basis order.
    #[must_use]
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of samples the fit expects.
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.matrix.ncols()
    }

    /// Fits coefficients to `samples` into `out`.
    pub fn fit(&self, samples: &[f64], out: &mut [f64]) {
        debug_assert_eq!(samples.len(), self.matrix.ncols());
        for (row, o) in out.iter_mut().enumerate() {
            *o = self
                .matrix
                .row(row)
                .iter()
                .zip(samples)
                .map(|(a, b)| a * b)
                .sum();
        }
    }
}

/// Evaluates SH coefficients at a fixed set of directions.
#[derive(Debug, Clone)]
pub struct ShResampler {
    basis: DMatrix<f64>,
}

impl ShResampler {
    /// Precomputes the basis at `directions`.
    #[must_use]
    pub fn new(order: usize, directions: &[Vector3<f64>]) -> Self {
        Self {
            basis: basis_matrix(order, directions),
        }
    }

    /// Number of output directions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.basis.nrows()
    }

    /// Returns true if there are no output directions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.basis.nrows() == 0
    }

    /// Evaluates `coefficients` at every direction into `out`.
    pub fn evaluate(&self, coefficients: &[f64], out: &mut [f64]) {
        for (row, o) in out.iter_mut().enumerate() {
            *o = self
                .basis
                .row(row)
                .iter()
                .zip(coefficients)
                .map(|(a, b)| a * b)
                .sum();
        }
    }
}

/// `n` roughly uniform directions on the upper (`z >= 0`) hemisphere.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fibonacci_hemisphere(n: usize) -> Vec<Vector3<f64>> {
    let golden = PI * (3.0 - 5.0_f64.sqrt());
    (0..n)
        .map(|i| {
            let z = 1.0 - (i as f64 + 0.5) / n as f64;
            let r = (1.0 - z * z).max(0.0).sqrt();
            let phi = golden * i as f64;
            Vector3::new(r * phi.cos(), r * phi.sin(), z)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_coefficient_count() {
        assert_eq!(num_coefficients(0), 1);
        assert_eq!(num_coefficients(4), 15);
        assert_eq!(num_coefficients(SH_ORDER), 28);
    }

    #[test]
    fn test_constant_term() {
        let mut row = vec![0.0; 28];
        basis_row(SH_ORDER, &Vector3::new(0.3, -0.2, 0.9), &mut row);
        assert_relative_eq!(row[0], 0.5 / PI.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_basis_is_antipodally_symmetric() {
        let v = Vector3::new(0.4, 0.5, -0.3);
        let mut a = vec![0.0; 28];
        let mut b = vec![0.0; 28];
        basis_row(SH_ORDER, &v, &mut a);
        basis_row(SH_ORDER, &(-v), &mut b);
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_fit_recovers_constant_signal() {
        let directions: Vec<Direction> = fibonacci_hemisphere(60)
            .into_iter()
            .filter_map(Direction::new)
            .collect();
        let fit = ShFit::new(SH_ORDER, &directions, SH_LAMBDA).unwrap();
        let samples = vec![2.0; directions.len()];
        let mut coefficients = vec![0.0; 28];
        fit.fit(&samples, &mut coefficients);

        let resampler = ShResampler::new(SH_ORDER, &[Vector3::z(), Vector3::x()]);
        let mut values = vec![0.0; 2];
        resampler.evaluate(&coefficients, &mut values);
        assert_relative_eq!(values[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(values[1], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fibonacci_hemisphere_is_unit_and_upper() {
        let dirs = fibonacci_hemisphere(100);
        assert_eq!(dirs.len(), 100);
        for d in dirs {
            assert_relative_eq!(d.norm(), 1.0, epsilon = 1e-12);
            assert!(d.z >= 0.0);
        }
    }

    #[test]
    fn test_odd_order_is_rejected() {
        let d = vec![Direction::from_xyz(0.0, 0.0, 1.0).unwrap()];
        assert!(ShFit::new(3, &d, SH_LAMBDA).is_err());
    }
}
