//! Random-forest classifier direction estimation.
//!
//! Builds a feature vector from the diffusion-weighted signal at the query
//! position (spherical-harmonic coefficients, or the SH-fitted signal
//! resampled on the sphere), the previous direction and optional extra
//! scalar images, and turns the forest's class probabilities into a
//! direction.

use crate::axial::AxialSum;
use crate::sh::{fibonacci_hemisphere, num_coefficients, ShFit, ShResampler, SH_LAMBDA, SH_ORDER};
use fibertrack_core::forest::{FeatureLayout, ForestModel, DIRECTION_FEATURES, RESAMPLED_DIRECTIONS};
use fibertrack_core::geometry::{Direction, VolumeGeometry};
use fibertrack_core::gradients::GradientTable;
use fibertrack_core::handler::{HandlerOptions, Proposal, TrackingHandler};
use fibertrack_core::volume::Volume;
use fibertrack_core::{Error, Result};
use nalgebra::Vector3;

/// Random-forest specific configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ForestConfig {
    /// Classes deviating more than this from the previous direction are
    /// ignored (degrees).
    pub angular_threshold_deg: f64,
    /// Layout the model must have; any layout is accepted when `None`.
    pub layout: Option<FeatureLayout>,
    /// Interpolation and flips.
    pub options: HandlerOptions,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            angular_threshold_deg: 45.0,
            layout: None,
            options: HandlerOptions::default(),
        }
    }
}

impl ForestConfig {
    /// Sets the angular threshold (degrees).
    #[must_use]
    pub fn with_angular_threshold(mut self, degrees: f64) -> Self {
        self.angular_threshold_deg = degrees;
        self
    }

    /// Requires a specific feature layout.
    #[must_use]
    pub fn with_layout(mut self, layout: FeatureLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Sets the shared handler options.
    #[must_use]
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }
}

/// Random-forest tracking handler.
pub struct ForestHandler {
    dwi: Volume,
    baseline: Vec<usize>,
    weighted: Vec<usize>,
    fit: ShFit,
    resampler: Option<ShResampler>,
    additional: Vec<Volume>,
    model: ForestModel,
    class_directions: Vec<Direction>,
    min_cos: f64,
    config: ForestConfig,
}

impl ForestHandler {
    /// Builds the handler and precomputes the SH fitting matrices.
    pub fn new(
        dwi: Volume,
        gradients: &GradientTable,
        model: ForestModel,
        additional: Vec<Volume>,
        config: ForestConfig,
    ) -> Result<Self> {
        model.validate()?;
        if let Some(layout) = config.layout {
            if layout != model.layout {
                return Err(Error::ConfigError(format!(
                    "model uses the {:?} feature layout, {layout:?} was requested",
                    model.layout
                )));
            }
        }
        if dwi.components() != gradients.len() {
            return Err(Error::ConfigError(format!(
                "diffusion image has {} volumes but the gradient table has {} entries",
                dwi.components(),
                gradients.len()
            )));
        }
        let baseline = gradients.baseline_indices();
        if baseline.is_empty() {
            return Err(Error::ConfigError(
                "diffusion image has no baseline (b=0) volume".to_string(),
            ));
        }
        let (weighted, directions): (Vec<usize>, Vec<Direction>) =
            gradients.weighted().into_iter().unzip();
        if weighted.is_empty() {
            return Err(Error::ConfigError(
                "diffusion image has no diffusion-weighted volume".to_string(),
            ));
        }

        for volume in &additional {
            if volume.components() != 1 {
                return Err(Error::InvalidVolume(format!(
                    "additional feature image has {} components, expected 1",
                    volume.components()
                )));
            }
            dwi.geometry()
                .ensure_same_grid(volume.geometry(), "additional feature image")?;
        }
        let expected = model.layout.feature_count(additional.len());
        if expected != model.num_features() {
            return Err(Error::ConfigError(format!(
                "model expects {} features, the inputs provide {expected}",
                model.num_features()
            )));
        }

        let fit = ShFit::new(SH_ORDER, &directions, SH_LAMBDA)?;
        let resampler = match model.layout {
            FeatureLayout::Reduced => None,
            FeatureLayout::Extended => {
                let sphere = model
                    .sampling_vectors()
                    .unwrap_or_else(|| fibonacci_hemisphere(RESAMPLED_DIRECTIONS));
                Some(ShResampler::new(SH_ORDER, &sphere))
            }
        };
        let flip = config.options.flip;
        let class_directions = model
            .unit_class_directions()
            .into_iter()
            .filter_map(|d| Direction::new(flip.apply(d.as_vector())))
            .collect();
        let min_cos = config.angular_threshold_deg.to_radians().cos();

        log::debug!(
            "Random forest: {} trees, {} classes, {} features ({:?})",
            model.trees.len(),
            model.num_classes(),
            model.num_features(),
            model.layout
        );

        Ok(Self {
            dwi,
            baseline,
            weighted,
            fit,
            resampler,
            additional,
            model,
            class_directions,
            min_cos,
            config,
        })
    }

    /// Handler configuration.
    #[must_use]
    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Classifier model.
    #[must_use]
    pub fn model(&self) -> &ForestModel {
        &self.model
    }

    /// Feature vector at `position`, `None` outside the volume or where the
    /// baseline signal vanishes.
    #[allow(clippy::cast_precision_loss)]
    pub fn features(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Option<Vec<f64>> {
        let interpolation = self.config.options.interpolation;
        let mut signal = vec![0.0; self.dwi.components()];
        if !self.dwi.sample(position, interpolation, &mut signal) {
            return None;
        }
        let b0 = self.baseline.iter().map(|&i| signal[i]).sum::<f64>() / self.baseline.len() as f64;
        if !b0.is_finite() || b0 <= 0.0 {
            return None;
        }
        let normalized: Vec<f64> = self.weighted.iter().map(|&i| signal[i] / b0).collect();

        let mut features = vec![0.0; self.model.num_features()];
        let signal_len = self.model.layout.signal_features();
        let mut coefficients = vec![0.0; num_coefficients(SH_ORDER)];
        self.fit.fit(&normalized, &mut coefficients);
        match &self.resampler {
            None => features[..signal_len].copy_from_slice(&coefficients),
            Some(resampler) => resampler.evaluate(&coefficients, &mut features[..signal_len]),
        }

        if let Some(previous) = previous {
            let model_frame = self.config.options.flip.apply(previous.as_vector());
            features[signal_len..signal_len + DIRECTION_FEATURES]
                .copy_from_slice(model_frame.as_slice());
        }

        let offset = signal_len + DIRECTION_FEATURES;
        for (slot, volume) in features[offset..].iter_mut().zip(&self.additional) {
            *slot = volume.sample_scalar(position, interpolation).unwrap_or(0.0);
        }
        Some(features)
    }

    /// Turns class probabilities into a proposal.
    fn decide(&self, probabilities: &[f64], previous: Option<&Direction>) -> Proposal {
        let non_fiber = probabilities[self.class_directions.len()];
        let mut sum = AxialSum::new(previous);
        match previous {
            Some(previous) => {
                for (class, p) in self.class_directions.iter().zip(probabilities) {
                    let cos = class.dot(previous).abs();
                    if *p <= 0.0 || cos < self.min_cos {
                        continue;
                    }
                    sum.add(class.as_vector(), p * cos);
                }
            }
            None => {
                let best = probabilities[..self.class_directions.len()]
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i);
                if let Some(best) = best {
                    sum = AxialSum::new(Some(&self.class_directions[best]));
                }
                for (class, p) in self.class_directions.iter().zip(probabilities) {
                    sum.add(class.as_vector(), *p);
                }
            }
        }

        let weight = sum.weight();
        if weight <= 0.0 || non_fiber > weight {
            return Proposal::none(weight);
        }
        match sum.direction() {
            Some(direction) => Proposal::new(direction, weight),
            None => Proposal::none(weight),
        }
    }
}

impl TrackingHandler for ForestHandler {
    fn name(&self) -> &'static str {
        "RandomForest"
    }

    fn geometry(&self) -> &VolumeGeometry {
        self.dwi.geometry()
    }

    fn propose(&self, position: &Vector3<f64>, previous: Option<&Direction>) -> Proposal {
        let Some(features) = self.features(position, previous) else {
            return Proposal::none(0.0);
        };
        let mut probabilities = vec![0.0; self.model.num_classes()];
        self.model.predict_proba(&features, &mut probabilities);
        self.decide(&probabilities, previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fibertrack_core::forest::{DecisionTree, TreeNode};

    fn grid() -> VolumeGeometry {
        VolumeGeometry::new([3, 3, 3], [1.0; 3], [0.0; 3]).unwrap()
    }

    fn gradients() -> GradientTable {
        let mut b_values = vec![0.0];
        let mut directions = vec![Vector3::zeros()];
        for v in fibonacci_hemisphere(30) {
            b_values.push(1000.0);
            directions.push(v);
        }
        GradientTable::new(b_values, directions).unwrap()
    }

    fn dwi(baseline: f32) -> Volume {
        let mut values = vec![baseline];
        values.extend(std::iter::repeat(0.5).take(30));
        Volume::filled(grid(), &values).unwrap()
    }

    fn leaf(probabilities: Vec<f64>) -> DecisionTree {
        DecisionTree::new(vec![TreeNode::Leaf { probabilities }])
    }

    fn model(trees: Vec<DecisionTree>) -> ForestModel {
        ForestModel {
            layout: FeatureLayout::Reduced,
            additional_features: 0,
            class_directions: vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            sampling_directions: None,
            trees,
        }
    }

    fn handler(model: ForestModel) -> ForestHandler {
        ForestHandler::new(dwi(1.0), &gradients(), model, Vec::new(), ForestConfig::default()).unwrap()
    }

    #[test]
    fn test_features_hold_normalized_signal_and_previous() {
        let h = handler(model(vec![leaf(vec![1.0, 0.0, 0.0, 0.0])]));
        let prev = Direction::from_xyz(0.0, 1.0, 0.0).unwrap();
        let features = h.features(&Vector3::new(1.0, 1.0, 1.0), Some(&prev)).unwrap();
        assert_eq!(features.len(), 31);
        // Constant normalized signal 0.5 lives in the l=0 coefficient only.
        assert_relative_eq!(features[0], 0.5 * 2.0 * std::f64::consts::PI.sqrt(), epsilon = 1e-6);
        assert_relative_eq!(features[29], 1.0);
    }

    #[test]
    fn test_most_probable_class_without_previous() {
        let h = handler(model(vec![leaf(vec![0.1, 0.7, 0.0, 0.2])]));
        let proposal = h.propose(&Vector3::new(1.0, 1.0, 1.0), None);
        let d = proposal.direction.unwrap();
        assert!(d.y() > 0.9);
        assert_relative_eq!(proposal.confidence, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_classes_outside_angular_threshold_are_ignored() {
        let h = handler(model(vec![leaf(vec![0.3, 0.5, 0.0, 0.2])]));
        let prev = Direction::from_xyz(-1.0, 0.0, 0.0).unwrap();
        let proposal = h.propose(&Vector3::new(1.0, 1.0, 1.0), Some(&prev));
        let d = proposal.direction.unwrap();
        assert_relative_eq!(d.x(), -1.0, epsilon = 1e-12);
        assert_relative_eq!(proposal.confidence, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_non_fiber_majority_stops() {
        let h = handler(model(vec![leaf(vec![0.2, 0.1, 0.0, 0.7])]));
        assert!(h.propose(&Vector3::new(1.0, 1.0, 1.0), None).direction.is_none());
    }

    #[test]
    fn test_zero_baseline_gives_no_direction() {
        let h = ForestHandler::new(
            dwi(0.0),
            &gradients(),
            model(vec![leaf(vec![1.0, 0.0, 0.0, 0.0])]),
            Vec::new(),
            ForestConfig::default(),
        )
        .unwrap();
        assert!(h.propose(&Vector3::new(1.0, 1.0, 1.0), None).direction.is_none());
    }

    #[test]
    fn test_feature_count_mismatch_is_config_error() {
        let extra = Volume::filled(grid(), &[1.0]).unwrap();
        let result = ForestHandler::new(
            dwi(1.0),
            &gradients(),
            model(vec![leaf(vec![1.0, 0.0, 0.0, 0.0])]),
            vec![extra],
            ForestConfig::default(),
        );
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_layout_requirement() {
        let result = ForestHandler::new(
            dwi(1.0),
            &gradients(),
            model(vec![leaf(vec![1.0, 0.0, 0.0, 0.0])]),
            Vec::new(),
            ForestConfig::default().with_layout(FeatureLayout::Extended),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_extended_layout_resamples_signal() {
        let mut m = model(vec![leaf(vec![0.0, 0.0, 1.0, 0.0])]);
        m.layout = FeatureLayout::Extended;
        let h = handler(m);
        let features = h.features(&Vector3::new(1.0, 1.0, 1.0), None).unwrap();
        assert_eq!(features.len(), 103);
        assert_relative_eq!(features[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(features[99], 0.5, epsilon = 1e-6);
        assert!(h.propose(&Vector3::new(1.0, 1.0, 1.0), None).direction.unwrap().z() > 0.99);
    }
}
