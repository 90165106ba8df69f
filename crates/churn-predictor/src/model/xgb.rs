use std::path::Path;

use crate::compat::xgboost::{Booster, ConversionError, XgbModel};
use crate::transform::EncodedFeatures;

use super::output::OutputTransform;
use super::{ChurnLabel, Classifier, InferenceError, check_input};

/// The model artifact is missing, corrupt, or does not match the feature layout.
///
/// Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("failed to read model {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed model artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("model was trained on {found} features, the transform produces {expected}")]
    FeatureCount { expected: usize, found: usize },
    #[error("model feature `{found}` at position {position} does not match transformed column `{expected}`")]
    FeatureName {
        position: usize,
        expected: String,
        found: String,
    },
}

/// Binary classifier backed by an XGBoost model.
#[derive(Debug, Clone)]
pub struct XgbClassifier {
    booster: Booster,
    output: OutputTransform,
    n_features: usize,
    feature_names: Vec<String>,
}

impl XgbClassifier {
    /// Convert a parsed XGBoost document.
    pub fn from_xgb(model: &XgbModel) -> Result<Self, ModelLoadError> {
        let output = model.output_transform()?;
        let booster = model.to_booster()?;
        let n_features = model.num_features();
        if let Booster::Tree(forest) = &booster {
            tracing::debug!(
                n_trees = forest.n_trees(),
                base_score = forest.base_score(),
                "converted tree booster"
            );
        }
        Ok(Self {
            booster,
            output,
            n_features,
            feature_names: model.learner.feature_names.clone(),
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, ModelLoadError> {
        Self::from_xgb(&XgbModel::from_json_str(json)?)
    }

    /// Load an XGBoost JSON model from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn booster(&self) -> &Booster {
        &self.booster
    }

    pub fn output_transform(&self) -> OutputTransform {
        self.output
    }

    /// Feature names recorded at training time; empty when the model was
    /// trained on an unnamed matrix.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Check the model was trained on exactly `columns`, in that order.
    ///
    /// Models without recorded names are only checked for width.
    pub fn check_layout(&self, columns: &[String]) -> Result<(), ModelLoadError> {
        if self.n_features != columns.len() {
            return Err(ModelLoadError::FeatureCount {
                expected: columns.len(),
                found: self.n_features,
            });
        }
        if self.feature_names.is_empty() {
            return Ok(());
        }
        if self.feature_names.len() != columns.len() {
            return Err(ModelLoadError::FeatureCount {
                expected: columns.len(),
                found: self.feature_names.len(),
            });
        }
        match self
            .feature_names
            .iter()
            .zip(columns)
            .position(|(found, expected)| found != expected)
        {
            Some(position) => Err(ModelLoadError::FeatureName {
                position,
                expected: columns[position].clone(),
                found: self.feature_names[position].clone(),
            }),
            None => Ok(()),
        }
    }

    /// Raw margin for a validated vector.
    pub fn predict_margin(&self, features: &EncodedFeatures) -> Result<f32, InferenceError> {
        check_input(self.n_features, features)?;
        Ok(self.booster.predict_margin(features.values()))
    }
}

impl Classifier for XgbClassifier {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, features: &EncodedFeatures) -> Result<f32, InferenceError> {
        Ok(self.output.probability(self.predict_margin(features)?))
    }

    fn predict(&self, features: &EncodedFeatures) -> Result<ChurnLabel, InferenceError> {
        Ok(self.output.label(self.predict_margin(features)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    fn model_json(feature_names: &[&str]) -> String {
        json!({
            "version": [1, 7, 6],
            "learner": {
                "feature_names": feature_names,
                "gradient_booster": {
                    "name": "gbtree",
                    "model": {
                        "trees": [{
                            "tree_param": {"num_nodes": "3", "num_feature": "2"},
                            "left_children": [1, -1, -1],
                            "right_children": [2, -1, -1],
                            "split_indices": [1, 0, 0],
                            "split_conditions": [8.0, 1.5, -1.5],
                            "default_left": [0, 0, 0]
                        }],
                        "tree_info": [0]
                    }
                },
                "objective": {"name": "binary:logistic", "reg_loss_param": {"scale_pos_weight": "1"}},
                "learner_model_param": {"base_score": "5E-1", "num_class": "0", "num_feature": "2"}
            }
        })
        .to_string()
    }

    fn features(values: [f32; 2]) -> EncodedFeatures {
        let columns: Arc<[String]> = vec!["tenure".to_string(), "last_nps_rating".to_string()].into();
        EncodedFeatures::new(columns, values.to_vec())
    }

    #[test]
    fn predicts_label_and_probability() {
        let clf = XgbClassifier::from_json_str(&model_json(&[])).unwrap();
        assert_eq!(clf.predict(&features([24.0, 6.0])).unwrap(), ChurnLabel::Churn);
        assert_eq!(clf.predict(&features([24.0, 9.0])).unwrap(), ChurnLabel::NotChurn);
        let p = clf.predict_proba(&features([24.0, 6.0])).unwrap();
        assert!(p > 0.8 && p < 0.9, "p = {p}");
    }

    #[test]
    fn rejects_wrong_width() {
        let clf = XgbClassifier::from_json_str(&model_json(&[])).unwrap();
        let columns: Arc<[String]> = vec!["tenure".to_string()].into();
        let short = EncodedFeatures::new(columns, vec![24.0]);
        assert!(matches!(
            clf.predict(&short),
            Err(InferenceError::ShapeMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn layout_check_compares_recorded_names() {
        let cols = vec!["tenure".to_string(), "last_nps_rating".to_string()];
        let named = XgbClassifier::from_json_str(&model_json(&["tenure", "last_nps_rating"])).unwrap();
        assert!(named.check_layout(&cols).is_ok());

        let swapped = XgbClassifier::from_json_str(&model_json(&["last_nps_rating", "tenure"])).unwrap();
        assert!(matches!(
            swapped.check_layout(&cols),
            Err(ModelLoadError::FeatureName { position: 0, .. })
        ));

        let unnamed = XgbClassifier::from_json_str(&model_json(&[])).unwrap();
        assert!(unnamed.check_layout(&cols).is_ok());
        assert!(matches!(
            unnamed.check_layout(&cols[..1]),
            Err(ModelLoadError::FeatureCount { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            XgbClassifier::load("/no/such/model.json"),
            Err(ModelLoadError::Io { .. })
        ));
    }
}
