//! Seed voxel selection and seed point placement.

use crate::propagator::TrackingMasks;
use fibertrack_core::geometry::VolumeGeometry;
use fibertrack_core::volume::TissueType;
use fibertrack_core::{Error, Result};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Voxels to seed from, in row-major order.
///
/// All foreground voxels of the seed mask (every voxel without one),
/// restricted to gray matter when `only_gray_matter` is set. Voxels outside
/// the tracking mask or inside the stop mask are never seeded.
pub fn seed_voxels(
    geometry: &VolumeGeometry,
    masks: &TrackingMasks,
    only_gray_matter: bool,
) -> Result<Vec<[usize; 3]>> {
    let mut voxels = match &masks.seed {
        Some(mask) => {
            geometry.ensure_same_grid(mask.geometry(), "seed mask")?;
            mask.foreground_voxels()
        }
        None => (0..geometry.voxel_count())
            .map(|index| geometry.voxel_from_linear(index))
            .collect(),
    };
    if let Some(tracking) = &masks.tracking {
        geometry.ensure_same_grid(tracking.geometry(), "tracking mask")?;
        voxels.retain(|&voxel| tracking.label(voxel) > 0);
    }
    if let Some(stop) = &masks.stop {
        geometry.ensure_same_grid(stop.geometry(), "stop mask")?;
        voxels.retain(|&voxel| stop.label(voxel) == 0);
    }
    if only_gray_matter {
        let Some(tissue) = &masks.tissue else {
            return Err(Error::ConfigError(
                "gray-matter seeding requires a tissue-type image".to_string(),
            ));
        };
        geometry.ensure_same_grid(tissue.geometry(), "tissue image")?;
        voxels.retain(|&voxel| tissue.label(voxel) == TissueType::Gray.label());
    }
    Ok(voxels)
}

/// Mixes a voxel index into a well-spread 64-bit value.
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Random generator owned by one seed voxel.
///
/// Depends only on the run seed and the voxel, so results do not depend on
/// which worker processes the voxel.
#[must_use]
pub fn voxel_rng(random_seed: u64, linear_index: usize) -> StdRng {
    StdRng::seed_from_u64(random_seed ^ mix(linear_index as u64))
}

/// Places `count` seed points in `voxel`.
///
/// A single seed sits at the voxel center; more seeds are jittered uniformly
/// within the voxel.
pub fn seed_points<R: Rng + ?Sized>(
    geometry: &VolumeGeometry,
    voxel: [usize; 3],
    count: usize,
    rng: &mut R,
) -> Vec<Vector3<f64>> {
    if count == 1 {
        return vec![geometry.voxel_center(voxel)];
    }
    #[allow(clippy::cast_precision_loss)]
    let center = Vector3::new(voxel[0] as f64, voxel[1] as f64, voxel[2] as f64);
    (0..count)
        .map(|_| {
            let jitter = Vector3::new(
                rng.gen_range(-0.5..0.5),
                rng.gen_range(-0.5..0.5),
                rng.gen_range(-0.5..0.5),
            );
            geometry.index_to_world(&(center + jitter))
        })
        .collect()
}
