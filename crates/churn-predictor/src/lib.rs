//! churn-predictor: customer churn scoring.
//!
//! Turns a raw customer record into the feature vector a pre-trained
//! XGBoost classifier expects, scores it, and keeps an append-only history of
//! every prediction.
//!
//! # Key Types
//!
//! - [`Schema`] - Field names, types, domains and the model's column order
//! - [`CategoricalEncoder`] - Pre-fitted one-hot encoding
//! - [`FeatureTransform`] - Raw record → ordered feature vector
//! - [`XgbClassifier`] / [`Classifier`] - Inference
//! - [`PredictionLog`] - CSV prediction history
//! - [`Artifacts`] / [`ChurnPredictor`] - Startup bundle and the scoring flow
//!
//! # Scoring
//!
//! Load the artifacts once with [`ChurnPredictor::open`], then call
//! [`ChurnPredictor::predict`] per record. See the [`pipeline`] module.

// Re-export approx for users comparing probabilities
pub use approx;

pub mod compat;
pub mod config;
pub mod encoder;
pub mod history;
pub mod model;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod testing;
pub mod transform;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use config::AppConfig;
pub use encoder::{CategoricalEncoder, EncoderError, OneHotFeature};
pub use history::{LogEntry, LogError, PredictionLog, PredictionSummary};
pub use model::{ChurnLabel, Classifier, InferenceError, ModelLoadError, XgbClassifier};
pub use pipeline::{
    ArtifactPaths, Artifacts, ChurnPredictor, LogStatus, PredictError, PredictionOutcome,
    StartupError,
};
pub use record::{FieldValue, RawRecord};
pub use schema::{Domain, FieldSpec, FieldType, Schema, SchemaError};
pub use transform::{
    EncodedFeatures, FeatureTransform, LayoutError, MEAN_EVE_MINUTES, MeanOffset, TransformError,
};
