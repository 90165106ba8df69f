//! Test utilities: fixture locations and a rule-based classifier.
//!
//! Used by unit tests and by the integration tests under `tests/`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::encoder::CategoricalEncoder;
use crate::model::{ChurnLabel, Classifier, InferenceError, check_input};
use crate::pipeline::{ArtifactPaths, StartupError};
use crate::record::RawRecord;
use crate::schema::Schema;
use crate::transform::EncodedFeatures;

/// Directory holding the JSON fixtures.
pub fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/test-cases")
}

/// Schema, encoder and XGBoost model fixtures.
///
/// The model predicts churn exactly when `last_nps_rating < 8`.
pub fn fixture_paths() -> ArtifactPaths {
    let dir = test_cases_dir();
    ArtifactPaths {
        schema: dir.join("schema.json"),
        encoder: dir.join("encoder.json"),
        model: dir.join("model.json"),
    }
}

/// Schema and encoder loaded from the fixtures.
pub fn sample_artifacts() -> Result<(Arc<Schema>, Arc<CategoricalEncoder>), StartupError> {
    let paths = fixture_paths();
    let schema = Schema::load(&paths.schema)?;
    let encoder = CategoricalEncoder::load(&paths.encoder)?;
    Ok((Arc::new(schema), Arc::new(encoder)))
}

/// A complete record for the fixture schema with an NPS rating of 6.
pub fn sample_record() -> RawRecord {
    RawRecord::new()
        .with("state_code", "KS")
        .with("tenure", 24)
        .with("contract_length", 12)
        .with("promotions_offered", "N")
        .with("remaining_term", 3)
        .with("last_nps_rating", 6)
        .with("area_code", "area_code_415")
        .with("international_plan", "no")
        .with("voice_mail_plan", "yes")
        .with("number_vmail_messages", 25)
        .with("total_eve_minutes", 150.0)
        .with("total_intl_minutes", 10.0)
        .with("total_intl_calls", 3)
}

/// Predicts churn when one column is strictly below a threshold.
#[derive(Debug, Clone)]
pub struct ThresholdClassifier {
    n_features: usize,
    column: usize,
    threshold: f32,
}

impl ThresholdClassifier {
    /// Classifier over `columns`; `None` when `column` is not among them.
    pub fn new(columns: &[String], column: &str, threshold: f32) -> Option<Self> {
        let column = columns.iter().position(|c| c == column)?;
        Some(Self {
            n_features: columns.len(),
            column,
            threshold,
        })
    }

    fn below(&self, features: &EncodedFeatures) -> Result<bool, InferenceError> {
        check_input(self.n_features, features)?;
        Ok(features.values()[self.column] < self.threshold)
    }
}

impl Classifier for ThresholdClassifier {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, features: &EncodedFeatures) -> Result<f32, InferenceError> {
        Ok(if self.below(features)? { 1.0 } else { 0.0 })
    }

    fn predict(&self, features: &EncodedFeatures) -> Result<ChurnLabel, InferenceError> {
        self.below(features).map(ChurnLabel::from_flag)
    }
}
