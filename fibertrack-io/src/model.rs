//! Random-forest model loading.

use crate::Result;
use fibertrack_core::forest::ForestModel;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Loads and validates a forest model stored as JSON.
pub fn load_forest<P: AsRef<Path>>(path: P) -> Result<ForestModel> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let model: ForestModel = serde_json::from_reader(reader)?;
    model.validate()?;
    log::info!(
        "Loaded forest {} ({} trees, {} classes, {} features)",
        path.display(),
        model.trees.len(),
        model.num_classes(),
        model.num_features()
    );
    Ok(model)
}

/// Writes a forest model as JSON.
pub fn save_forest<P: AsRef<Path>>(path: P, model: &ForestModel) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), model)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use fibertrack_core::forest::{DecisionTree, FeatureLayout, TreeNode};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MODEL: &str = r#"{
        "layout": "reduced",
        "class_directions": [[1, 0, 0], [0, 1, 0]],
        "trees": [
            {"nodes": [
                {"type": "split", "feature": 0, "threshold": 0.5, "left": 1, "right": 2},
                {"type": "leaf", "probabilities": [0.8, 0.1, 0.1]},
                {"type": "leaf", "probabilities": [0.0, 0.2, 0.8]}
            ]}
        ]
    }"#;

    #[test]
    fn test_load_forest_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MODEL.as_bytes()).unwrap();

        let model = load_forest(file.path()).unwrap();
        assert_eq!(model.layout, FeatureLayout::Reduced);
        assert_eq!(model.additional_features, 0);
        assert_eq!(model.num_classes(), 3);
        assert!(model.sampling_directions.is_none());

        let mut features = vec![0.0; model.num_features()];
        let mut proba = vec![0.0; 3];
        model.predict_proba(&features, &mut proba);
        assert_eq!(proba, vec![0.8, 0.1, 0.1]);
        features[0] = 1.0;
        model.predict_proba(&features, &mut proba);
        assert_eq!(proba, vec![0.0, 0.2, 0.8]);
    }

    #[test]
    fn test_inconsistent_model_is_rejected() {
        let broken = MODEL.replace("[0.8, 0.1, 0.1]", "[0.8, 0.2]");
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(broken.as_bytes()).unwrap();
        assert!(matches!(load_forest(file.path()), Err(Error::CoreError(_))));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{\"layout\": \"reduced\"").unwrap();
        assert!(matches!(load_forest(file.path()), Err(Error::Json(_))));
    }

    #[test]
    fn test_save_then_load() {
        let model = ForestModel {
            layout: FeatureLayout::Extended,
            additional_features: 1,
            class_directions: vec![[0.0, 0.0, 1.0]],
            sampling_directions: None,
            trees: vec![DecisionTree::new(vec![TreeNode::Leaf {
                probabilities: vec![0.6, 0.4],
            }])],
        };
        let file = NamedTempFile::new().unwrap();
        save_forest(file.path(), &model).unwrap();
        assert_eq!(load_forest(file.path()).unwrap(), model);
    }
}
