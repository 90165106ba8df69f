//! Model inference.
//!
//! # Overview
//!
//! - [`Classifier`]: the `predict(vector) -> {0, 1}` seam the pipeline calls
//! - [`XgbClassifier`]: a classifier backed by an XGBoost JSON artifact
//! - [`ChurnLabel`]: the predicted class
//!
//! Models are immutable after loading and stateless across calls, so one
//! instance is shared read-only by every request.

pub mod linear;
pub mod output;
pub mod tree;
mod xgb;

pub use linear::LinearModel;
pub use output::OutputTransform;
pub use tree::{Forest, Tree};
pub use xgb::{ModelLoadError, XgbClassifier};

use crate::transform::EncodedFeatures;

/// Predicted outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChurnLabel {
    /// Class 0.
    NotChurn,
    /// Class 1.
    Churn,
}

impl ChurnLabel {
    #[inline]
    pub fn from_flag(churn: bool) -> Self {
        if churn { ChurnLabel::Churn } else { ChurnLabel::NotChurn }
    }

    /// Integer class as stored in the prediction log.
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            ChurnLabel::NotChurn => 0,
            ChurnLabel::Churn => 1,
        }
    }

    /// Sentence shown to the person who asked for the prediction.
    pub fn verdict(self) -> &'static str {
        match self {
            ChurnLabel::NotChurn => "Your customer will not churn",
            ChurnLabel::Churn => "Your customer will churn",
        }
    }
}

impl TryFrom<i64> for ChurnLabel {
    type Error = i64;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ChurnLabel::NotChurn),
            1 => Ok(ChurnLabel::Churn),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for ChurnLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChurnLabel::NotChurn => write!(f, "not churn"),
            ChurnLabel::Churn => write!(f, "churn"),
        }
    }
}

/// The feature vector does not fit the model. Aborts the request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("model expects {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("feature `{column}` is not finite ({value})")]
    NonFinite { column: String, value: f32 },
}

/// Binary classifier over encoded feature vectors.
pub trait Classifier: Send + Sync {
    /// Number of features the model was trained on.
    fn n_features(&self) -> usize;

    /// Probability of churn.
    fn predict_proba(&self, features: &EncodedFeatures) -> Result<f32, InferenceError>;

    /// Predicted class.
    fn predict(&self, features: &EncodedFeatures) -> Result<ChurnLabel, InferenceError>;
}

/// Reject inputs whose shape or values the model cannot score.
///
/// Vectors are never truncated or padded.
pub fn check_input(n_features: usize, features: &EncodedFeatures) -> Result<(), InferenceError> {
    if features.len() != n_features {
        return Err(InferenceError::ShapeMismatch {
            expected: n_features,
            actual: features.len(),
        });
    }
    if let Some((column, &value)) = features
        .columns()
        .iter()
        .zip(features.values())
        .find(|(_, v)| !v.is_finite())
    {
        return Err(InferenceError::NonFinite {
            column: column.clone(),
            value,
        });
    }
    Ok(())
}
