//! Random-forest voxel classifier model.
//!
//! A forest maps a feature vector to class probabilities. Classes `0..D`
//! stand for the model's `D` fiber directions; class `D` is "non-fiber".

use crate::geometry::Direction;
use crate::{Error, Result};
use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of spherical-harmonic coefficients of a symmetric order-6 basis.
pub const SH_COEFFICIENTS: usize = 28;
/// Number of sphere directions the extended layout resamples the signal at.
pub const RESAMPLED_DIRECTIONS: usize = 100;
/// Features contributed by the previous direction.
pub const DIRECTION_FEATURES: usize = 3;

/// Signal part of the feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FeatureLayout {
    /// Spherical-harmonic coefficients of the normalized signal.
    #[default]
    Reduced,
    /// SH-fitted signal resampled on a fixed set of sphere directions.
    Extended,
}

impl FeatureLayout {
    /// Number of signal features.
    #[must_use]
    pub fn signal_features(self) -> usize {
        match self {
            Self::Reduced => SH_COEFFICIENTS,
            Self::Extended => RESAMPLED_DIRECTIONS,
        }
    }

    /// Total feature count with `additional` extra scalar features.
    #[must_use]
    pub fn feature_count(self, additional: usize) -> usize {
        self.signal_features() + DIRECTION_FEATURES + additional
    }
}

/// A node of a decision tree.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "lowercase"))]
pub enum TreeNode {
    /// Goes `left` if `features[feature] <= threshold`, `right` otherwise.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Class probabilities.
    Leaf { probabilities: Vec<f64> },
}

/// A decision tree stored as a flat node list; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Creates a tree from its nodes.
    #[must_use]
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Leaf probabilities reached by `features`.
    ///
    /// Only valid on a validated tree, where every child index is larger
    /// than its parent's, so the walk always ends at a leaf.
    fn leaf(&self, features: &[f64]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { probabilities } => return probabilities,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn validate(&self, tree: usize, num_features: usize, num_classes: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidModel(format!("tree {tree} has no nodes")));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= num_features {
                        return Err(Error::InvalidModel(format!(
                            "tree {tree} node {index} splits on feature {feature} of {num_features}"
                        )));
                    }
                    if !threshold.is_finite() {
                        return Err(Error::InvalidModel(format!(
                            "tree {tree} node {index} has a non-finite threshold"
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(Error::InvalidModel(format!(
                                "tree {tree} node {index} has invalid child {child}"
                            )));
                        }
                    }
                }
                TreeNode::Leaf { probabilities } => {
                    if probabilities.len() != num_classes {
                        return Err(Error::InvalidModel(format!(
                            "tree {tree} leaf {index} has {} probabilities, expected {num_classes}",
                            probabilities.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A trained random-forest tractography classifier.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ForestModel {
    /// Signal feature layout the model was trained with.
    pub layout: FeatureLayout,
    /// Number of extra scalar features (one per additional feature image).
    #[cfg_attr(feature = "serde", serde(default))]
    pub additional_features: usize,
    /// Direction of each fiber class.
    pub class_directions: Vec<[f64; 3]>,
    /// Sphere directions of the extended layout; a Fibonacci hemisphere is
    /// used when absent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub sampling_directions: Option<Vec<[f64; 3]>>,
    /// Trees of the forest.
    pub trees: Vec<DecisionTree>,
}

impl ForestModel {
    /// Number of direction classes.
    #[must_use]
    pub fn direction_classes(&self) -> usize {
        self.class_directions.len()
    }

    /// Total number of classes including "non-fiber".
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.class_directions.len() + 1
    }

    /// Expected length of the feature vector.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.layout.feature_count(self.additional_features)
    }

    /// Unit direction of class `class`.
    #[must_use]
    pub fn class_direction(&self, class: usize) -> Option<Direction> {
        self.class_directions
            .get(class)
            .and_then(|&[x, y, z]| Direction::from_xyz(x, y, z))
    }

    /// Unit directions of every fiber class, in class order.
    ///
    /// Only meaningful on a validated model.
    #[must_use]
    pub fn unit_class_directions(&self) -> Vec<Direction> {
        (0..self.direction_classes())
            .filter_map(|class| self.class_direction(class))
            .collect()
    }

    /// Sampling directions as vectors, if the model provides them.
    #[must_use]
    pub fn sampling_vectors(&self) -> Option<Vec<Vector3<f64>>> {
        self.sampling_directions
            .as_ref()
            .map(|dirs| dirs.iter().map(|&[x, y, z]| Vector3::new(x, y, z)).collect())
    }

    /// Checks structural consistency of the model.
    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(Error::InvalidModel("forest has no trees".to_string()));
        }
        if self.class_directions.is_empty() {
            return Err(Error::InvalidModel(
                "forest has no direction classes".to_string(),
            ));
        }
        if let Some(class) = (0..self.direction_classes()).find(|&c| self.class_direction(c).is_none())
        {
            return Err(Error::InvalidModel(format!(
                "class {class} has a zero or non-finite direction"
            )));
        }
        if let Some(dirs) = &self.sampling_directions {
            if self.layout != FeatureLayout::Extended {
                return Err(Error::InvalidModel(
                    "sampling directions are only used by the extended layout".to_string(),
                ));
            }
            if dirs.len() != RESAMPLED_DIRECTIONS {
                return Err(Error::InvalidModel(format!(
                    "expected {RESAMPLED_DIRECTIONS} sampling directions, got {}",
                    dirs.len()
                )));
            }
            if dirs
                .iter()
                .any(|&[x, y, z]| Direction::from_xyz(x, y, z).is_none())
            {
                return Err(Error::InvalidModel(
                    "sampling directions must be non-zero".to_string(),
                ));
            }
        }
        let num_features = self.num_features();
        let num_classes = self.num_classes();
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(index, num_features, num_classes)?;
        }
        Ok(())
    }

    /// Averages class probabilities over all trees into `out`.
    ///
    /// `features` must have `num_features()` entries and `out`
    /// `num_classes()` entries.
    #[allow(clippy::cast_precision_loss)]
    pub fn predict_proba(&self, features: &[f64], out: &mut [f64]) {
        out.fill(0.0);
        for tree in &self.trees {
            for (acc, p) in out.iter_mut().zip(tree.leaf(features)) {
                *acc += p;
            }
        }
        let scale = 1.0 / self.trees.len() as f64;
        for value in out.iter_mut() {
            *value *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature: usize, threshold: f64, left: Vec<f64>, right: Vec<f64>) -> DecisionTree {
        DecisionTree::new(vec![
            TreeNode::Split {
                feature,
                threshold,
                left: 1,
                right: 2,
            },
            TreeNode::Leaf { probabilities: left },
            TreeNode::Leaf {
                probabilities: right,
            },
        ])
    }

    fn model() -> ForestModel {
        ForestModel {
            layout: FeatureLayout::Reduced,
            additional_features: 0,
            class_directions: vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            sampling_directions: None,
            trees: vec![
                stump(0, 0.5, vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]),
                stump(0, 0.5, vec![0.5, 0.0, 0.5], vec![0.0, 0.0, 1.0]),
            ],
        }
    }

    #[test]
    fn test_feature_counts() {
        assert_eq!(FeatureLayout::Reduced.feature_count(0), 31);
        assert_eq!(FeatureLayout::Extended.feature_count(2), 105);
        let m = model();
        assert_eq!(m.num_features(), 31);
        assert_eq!(m.num_classes(), 3);
    }

    #[test]
    fn test_predict_proba_averages_trees() {
        let m = model();
        m.validate().unwrap();
        let mut features = vec![0.0; m.num_features()];
        let mut out = vec![0.0; m.num_classes()];

        m.predict_proba(&features, &mut out);
        assert_eq!(out, vec![0.75, 0.0, 0.25]);

        features[0] = 1.0;
        m.predict_proba(&features, &mut out);
        assert_eq!(out, vec![0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_validate_rejects_backward_children() {
        let mut m = model();
        m.trees[0].nodes[0] = TreeNode::Split {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 2,
        };
        assert!(matches!(m.validate(), Err(Error::InvalidModel(_))));
    }

    #[test]
    fn test_validate_rejects_wrong_leaf_width() {
        let mut m = model();
        m.trees[1].nodes[2] = TreeNode::Leaf {
            probabilities: vec![1.0, 0.0],
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_feature() {
        let mut m = model();
        m.trees[0].nodes[0] = TreeNode::Split {
            feature: 31,
            threshold: 0.0,
            left: 1,
            right: 2,
        };
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_class_direction() {
        let mut m = model();
        m.class_directions[1] = [0.0, 0.0, 0.0];
        assert!(m.validate().is_err());
    }
}
