//! NIfTI-1 volume and mask loading.
//!
//! Images are read with the `nifti` crate (`.nii` and `.nii.gz`). Axes past
//! the third are flattened into per-voxel components, so a 4D diffusion
//! series, a 5D vector image and a 6-component tensor image all load as a
//! [`Volume`].

use crate::{Error, Result};
use fibertrack_core::geometry::VolumeGeometry;
use fibertrack_core::volume::{Mask, Volume};
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

/// Grid of a NIfTI image.
///
/// The sform affine is used when `sform_code > 0`, then the qform
/// quaternion when `qform_code > 0`. Otherwise the grid is axis-aligned with
/// `pixdim` spacing and the qform offset as origin.
pub fn header_geometry(header: &NiftiHeader, dims: [usize; 3]) -> Result<VolumeGeometry> {
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        let linear = Matrix3::from_fn(|r, c| f64::from(rows[r][c]));
        let origin = Vector3::from_fn(|r, _| f64::from(rows[r][3]));
        return Ok(VolumeGeometry::from_affine(dims, linear, origin)?);
    }

    let mut spacing = [1.0; 3];
    for (axis, value) in spacing.iter_mut().enumerate() {
        let pixdim = f64::from(header.pixdim[axis + 1]).abs();
        if pixdim > 0.0 && pixdim.is_finite() {
            *value = pixdim;
        } else {
            log::warn!("pixdim[{}] is {pixdim}, using 1.0", axis + 1);
        }
    }
    let origin = Vector3::new(
        f64::from(header.quatern_x),
        f64::from(header.quatern_y),
        f64::from(header.quatern_z),
    );
    if header.qform_code > 0 {
        // pixdim[0] is the qfac handedness sign.
        if header.pixdim[0] < 0.0 {
            spacing[2] = -spacing[2];
        }
        let linear = qform_rotation(header) * Matrix3::from_diagonal(&Vector3::from(spacing));
        return Ok(VolumeGeometry::from_affine(dims, linear, origin)?);
    }
    Ok(VolumeGeometry::from_affine(
        dims,
        Matrix3::from_diagonal(&Vector3::from(spacing)),
        origin,
    )?)
}

/// Rotation stored in the qform quaternion (`b`, `c`, `d`; `a` is implied).
fn qform_rotation(header: &NiftiHeader) -> Matrix3<f64> {
    let (b, c, d) = (
        f64::from(header.quatern_b),
        f64::from(header.quatern_c),
        f64::from(header.quatern_d),
    );
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    UnitQuaternion::from_quaternion(Quaternion::new(a, b, c, d))
        .to_rotation_matrix()
        .into_inner()
}

/// Loads a NIfTI image as a multi-component volume.
pub fn load_volume<P: AsRef<Path>>(path: P) -> Result<Volume> {
    let path = path.as_ref();
    let object = ReaderOptions::new().read_file(path)?;
    let header = object.header().clone();
    let array = object.into_volume().into_ndarray::<f32>()?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(Error::InvalidFormat(format!(
            "{}: expected at least 3 dimensions, got {}",
            path.display(),
            shape.len()
        )));
    }
    let dims = [shape[0], shape[1], shape[2]];
    let components: usize = shape[3..].iter().product();
    let geometry = header_geometry(&header, dims)?;

    // Logical iteration order is x, y, z, then the trailing axes.
    let values: Vec<f32> = array.iter().copied().collect();
    let volume = Volume::from_vec(geometry, components, values)?;
    log::debug!(
        "Loaded {} ({}x{}x{}, {} components)",
        path.display(),
        dims[0],
        dims[1],
        dims[2],
        components
    );
    Ok(volume)
}

/// Loads a single-component NIfTI image as a label mask.
///
/// Values are rounded to the nearest label and clamped to `0..=255`.
pub fn load_mask<P: AsRef<Path>>(path: P) -> Result<Mask> {
    let path = path.as_ref();
    let volume = load_volume(path)?;
    if volume.components() != 1 {
        return Err(Error::InvalidFormat(format!(
            "{}: mask must have one component, got {}",
            path.display(),
            volume.components()
        )));
    }
    Ok(volume_to_mask(&volume))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn volume_to_mask(volume: &Volume) -> Mask {
    Mask::from_fn(volume.geometry().clone(), |voxel| {
        let value = volume.value(voxel, 0);
        if value.is_finite() {
            value.round().clamp(0.0, 255.0) as u8
        } else {
            0
        }
    })
}
