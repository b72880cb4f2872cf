//! Synthetic volumes shared by the tracking integration tests.
#![allow(dead_code, clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use fibertrack_algorithms::sh::fibonacci_hemisphere;
use fibertrack_core::forest::{DecisionTree, FeatureLayout, ForestModel, TreeNode};
use fibertrack_core::geometry::VolumeGeometry;
use fibertrack_core::gradients::GradientTable;
use fibertrack_core::volume::{Mask, Volume};
use nalgebra::Vector3;

/// Weighted volumes in [`gradient_table`].
pub const WEIGHTED_VOLUMES: usize = 30;

/// Cubic grid with isotropic spacing, origin at zero.
pub fn grid(n: usize, spacing: f64) -> VolumeGeometry {
    VolumeGeometry::new([n, n, n], [spacing; 3], [0.0; 3]).unwrap()
}

/// Ball of voxels whose index lies within `radius` of `center`.
pub fn sphere_mask(geometry: &VolumeGeometry, center: [usize; 3], radius: f64) -> Mask {
    Mask::from_fn(geometry.clone(), |[x, y, z]| {
        let d2 = [x, y, z]
            .iter()
            .zip(center)
            .map(|(&a, b)| (a as f64 - b as f64).powi(2))
            .sum::<f64>();
        u8::from(d2 <= radius * radius)
    })
}

/// Axis-aligned box of voxels `lo..=hi`.
pub fn box_mask(geometry: &VolumeGeometry, lo: [usize; 3], hi: [usize; 3]) -> Mask {
    Mask::from_fn(geometry.clone(), |v| {
        u8::from((0..3).all(|axis| v[axis] >= lo[axis] && v[axis] <= hi[axis]))
    })
}

/// Mask with a single foreground voxel.
pub fn single_voxel_mask(geometry: &VolumeGeometry, voxel: [usize; 3]) -> Mask {
    Mask::from_fn(geometry.clone(), |v| u8::from(v == voxel))
}

/// Identical prolate tensors (`xx, xy, xz, yy, yz, zz`) elongated along `axis`.
pub fn prolate_tensors(geometry: &VolumeGeometry, axis: usize) -> Volume {
    let mut diagonal = [0.3f32; 3];
    diagonal[axis] = 1.7;
    let values = [diagonal[0], 0.0, 0.0, diagonal[1], 0.0, diagonal[2]];
    Volume::filled(geometry.clone(), &values).unwrap()
}

/// One peak per voxel with the same direction and amplitude.
pub fn uniform_peaks(geometry: &VolumeGeometry, direction: [f32; 3], amplitude: f32) -> Volume {
    let norm = direction.iter().map(|v| v * v).sum::<f32>().sqrt();
    let values: Vec<f32> = direction.iter().map(|v| v / norm * amplitude).collect();
    Volume::filled(geometry.clone(), &values).unwrap()
}

/// Peaks circling the Z axis through the grid center (unit amplitude).
pub fn circular_peaks(geometry: &VolumeGeometry) -> Volume {
    let center = (geometry.dims()[0] - 1) as f64 / 2.0;
    Volume::from_fn(geometry.clone(), 3, |[x, y, _], c| {
        let tangent = Vector3::new(-(y as f64 - center), x as f64 - center, 0.0);
        let norm = tangent.norm();
        if norm < 1e-9 {
            return 0.0;
        }
        (tangent[c] / norm) as f32
    })
    .unwrap()
}

/// Voxel-index bounds check with a small tolerance.
pub fn in_voxel(geometry: &VolumeGeometry, p: &Vector3<f64>, voxel: [usize; 3], axes: &[usize]) -> bool {
    let index = geometry.world_to_index(p);
    axes.iter()
        .all(|&axis| (index[axis] - voxel[axis] as f64).abs() <= 0.5 + 1e-9)
}

/// One b=0 volume followed by weighted volumes on a Fibonacci hemisphere.
pub fn gradient_table() -> GradientTable {
    let mut b_values = vec![0.0];
    let mut directions = vec![Vector3::zeros()];
    for v in fibonacci_hemisphere(WEIGHTED_VOLUMES) {
        b_values.push(1000.0);
        directions.push(v);
    }
    GradientTable::new(b_values, directions).unwrap()
}

/// Diffusion image matching [`gradient_table`] with a flat attenuated signal.
pub fn constant_dwi(geometry: &VolumeGeometry) -> Volume {
    let mut values = vec![1.0];
    values.extend(std::iter::repeat(0.5).take(WEIGHTED_VOLUMES));
    Volume::filled(geometry.clone(), &values).unwrap()
}

/// Single-leaf forest over the X, Y and Z classes plus non-fiber.
pub fn leaf_forest(probabilities: [f64; 4]) -> ForestModel {
    ForestModel {
        layout: FeatureLayout::Reduced,
        additional_features: 0,
        class_directions: vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        sampling_directions: None,
        trees: vec![DecisionTree::new(vec![TreeNode::Leaf {
            probabilities: probabilities.to_vec(),
        }])],
    }
}
