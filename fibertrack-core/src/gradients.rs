//! Diffusion gradient tables.

use crate::geometry::Direction;
use crate::{Error, Result};
use nalgebra::Vector3;

/// b-value below which an acquisition counts as a baseline (b=0) image.
pub const BASELINE_B_VALUE: f64 = 50.0;

/// b-values and gradient directions of a diffusion-weighted acquisition.
///
/// Entry `i` describes component `i` of the diffusion-weighted volume.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTable {
    b_values: Vec<f64>,
    directions: Vec<Vector3<f64>>,
}

impl GradientTable {
    /// Creates a table; both lists must have the same length.
    pub fn new(b_values: Vec<f64>, directions: Vec<Vector3<f64>>) -> Result<Self> {
        if b_values.len() != directions.len() {
            return Err(Error::ConfigError(format!(
                "gradient table has {} b-values but {} directions",
                b_values.len(),
                directions.len()
            )));
        }
        if b_values.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return Err(Error::ConfigError(
                "gradient table contains negative or non-finite b-values".to_string(),
            ));
        }
        Ok(Self {
            b_values,
            directions,
        })
    }

    /// Number of acquisitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.b_values.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.b_values.is_empty()
    }

    /// b-values.
    #[must_use]
    pub fn b_values(&self) -> &[f64] {
        &self.b_values
    }

    /// Indices of the baseline acquisitions.
    #[must_use]
    pub fn baseline_indices(&self) -> Vec<usize> {
        self.b_values
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b < BASELINE_B_VALUE)
            .map(|(i, _)| i)
            .collect()
    }

    /// Indices and unit directions of the diffusion-weighted acquisitions.
    ///
    /// Acquisitions with a zero-length gradient vector are skipped.
    #[must_use]
    pub fn weighted(&self) -> Vec<(usize, Direction)> {
        self.b_values
            .iter()
            .zip(&self.directions)
            .enumerate()
            .filter(|&(_, (&b, _))| b >= BASELINE_B_VALUE)
            .filter_map(|(i, (_, v))| Direction::new(*v).map(|d| (i, d)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_and_weighted_split() {
        let table = GradientTable::new(
            vec![0.0, 1000.0, 5.0, 1000.0],
            vec![
                Vector3::zeros(),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::zeros(),
                Vector3::new(0.0, 2.0, 0.0),
            ],
        )
        .unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.baseline_indices(), vec![0, 2]);
        let weighted = table.weighted();
        assert_eq!(weighted.len(), 2);
        assert_eq!(weighted[1].0, 3);
        assert!((weighted[1].1.y() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        assert!(GradientTable::new(vec![0.0], vec![]).is_err());
        assert!(GradientTable::new(vec![-1.0], vec![Vector3::zeros()]).is_err());
    }
}
