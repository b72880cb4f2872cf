//! FSL-style b-value / b-vector loading.

use crate::{Error, Result};
use fibertrack_core::gradients::GradientTable;
use nalgebra::Vector3;
use std::fs;
use std::path::Path;

fn parse_rows(text: &str, what: &str) -> Result<Vec<Vec<f64>>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|token| !token.is_empty())
                .map(|token| {
                    token.parse::<f64>().map_err(|_| {
                        Error::InvalidFormat(format!("{what}: cannot parse '{token}'"))
                    })
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect()
}

/// Parses b-values: whitespace-separated numbers on one or more lines.
pub fn parse_bvals(text: &str) -> Result<Vec<f64>> {
    Ok(parse_rows(text, "bvals")?.into_iter().flatten().collect())
}

/// Parses b-vectors.
///
/// Accepts the FSL layout (three rows of N values) and the transposed layout
/// (N rows of three values). A 3x3 file is read in the FSL layout.
pub fn parse_bvecs(text: &str) -> Result<Vec<Vector3<f64>>> {
    let rows = parse_rows(text, "bvecs")?;
    if rows.len() == 3 && rows.iter().all(|row| row.len() == rows[0].len()) {
        let n = rows[0].len();
        return Ok((0..n)
            .map(|i| Vector3::new(rows[0][i], rows[1][i], rows[2][i]))
            .collect());
    }
    if rows.iter().all(|row| row.len() == 3) {
        return Ok(rows
            .iter()
            .map(|row| Vector3::new(row[0], row[1], row[2]))
            .collect());
    }
    Err(Error::InvalidFormat(
        "bvecs: expected 3 rows of N values or N rows of 3 values".to_string(),
    ))
}

/// Loads a gradient table from a `.bval` and a `.bvec` file.
pub fn load_gradients<P: AsRef<Path>, Q: AsRef<Path>>(bvals: P, bvecs: Q) -> Result<GradientTable> {
    let b_values = parse_bvals(&fs::read_to_string(bvals.as_ref())?)?;
    let directions = parse_bvecs(&fs::read_to_string(bvecs.as_ref())?)?;
    let table = GradientTable::new(b_values, directions)?;
    log::debug!(
        "Loaded {} gradients ({} baseline)",
        table.len(),
        table.baseline_indices().len()
    );
    Ok(table)
}
