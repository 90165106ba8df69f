//! Startup bundle and the per-request scoring flow.
//!
//! [`Artifacts`] is loaded once and holds everything immutable: schema,
//! encoder, model and the compiled [`FeatureTransform`]. [`ChurnPredictor`]
//! pairs it with the [`PredictionLog`] and runs transform → infer → append.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::encoder::{CategoricalEncoder, EncoderError};
use crate::history::{LogEntry, LogError, PredictionLog, PredictionSummary};
use crate::model::{ChurnLabel, Classifier, InferenceError, ModelLoadError, XgbClassifier};
use crate::record::RawRecord;
use crate::schema::{Schema, SchemaError};
use crate::transform::{EncodedFeatures, FeatureTransform, LayoutError, MeanOffset, TransformError};

// =============================================================================
// Errors
// =============================================================================

/// An artifact could not be loaded or the artifacts disagree with each other.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to load schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("failed to load encoder: {0}")]
    Encoder(#[from] EncoderError),
    #[error("failed to load model: {0}")]
    Model(#[from] ModelLoadError),
    #[error("inconsistent feature layout: {0}")]
    Layout(#[from] LayoutError),
}

/// A single request could not be scored.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

// =============================================================================
// Artifacts
// =============================================================================

/// Locations of the three startup artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub schema: PathBuf,
    pub encoder: PathBuf,
    pub model: PathBuf,
}

/// Read-only state shared by every request.
#[derive(Clone)]
pub struct Artifacts {
    transform: FeatureTransform,
    model: Arc<dyn Classifier>,
}

impl std::fmt::Debug for Artifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifacts")
            .field("columns", &self.transform.columns())
            .field("n_features", &self.model.n_features())
            .finish()
    }
}

impl Artifacts {
    /// Load schema, encoder and model, stopping at the first failure.
    ///
    /// The model's recorded feature layout must equal the schema's output
    /// column order.
    pub fn load(paths: &ArtifactPaths, engineered: Option<MeanOffset>) -> Result<Self, StartupError> {
        let schema = Schema::load(&paths.schema)?;
        tracing::info!(
            path = %paths.schema.display(),
            fields = schema.fields().len(),
            columns = schema.column_order_out().len(),
            "loaded schema"
        );

        let encoder = CategoricalEncoder::load(&paths.encoder)?;
        tracing::info!(
            path = %paths.encoder.display(),
            features = encoder.features().len(),
            "loaded encoder"
        );

        let model = XgbClassifier::load(&paths.model)?;
        model.check_layout(schema.column_order_out())?;
        tracing::info!(
            path = %paths.model.display(),
            n_features = model.n_features(),
            "loaded model"
        );

        Self::new(Arc::new(schema), Arc::new(encoder), Arc::new(model), engineered)
    }

    /// Assemble a bundle from already-built parts.
    pub fn new(
        schema: Arc<Schema>,
        encoder: Arc<CategoricalEncoder>,
        model: Arc<dyn Classifier>,
        engineered: Option<MeanOffset>,
    ) -> Result<Self, StartupError> {
        let transform = FeatureTransform::new(schema, encoder, engineered)?;
        if model.n_features() != transform.columns().len() {
            return Err(ModelLoadError::FeatureCount {
                expected: transform.columns().len(),
                found: model.n_features(),
            }
            .into());
        }
        Ok(Self { transform, model })
    }

    pub fn schema(&self) -> &Schema {
        self.transform.schema()
    }

    pub fn transform(&self) -> &FeatureTransform {
        &self.transform
    }

    pub fn model(&self) -> &dyn Classifier {
        self.model.as_ref()
    }
}

// =============================================================================
// Prediction
// =============================================================================

/// Whether the prediction made it into the history.
#[derive(Debug)]
pub enum LogStatus {
    Recorded,
    Failed(LogError),
}

impl LogStatus {
    pub fn is_recorded(&self) -> bool {
        matches!(self, LogStatus::Recorded)
    }
}

/// Result of scoring one record.
#[derive(Debug)]
pub struct PredictionOutcome {
    pub label: ChurnLabel,
    pub probability: f32,
    pub features: EncodedFeatures,
    pub log_status: LogStatus,
}

/// Scores records and records every prediction.
#[derive(Debug)]
pub struct ChurnPredictor {
    artifacts: Artifacts,
    log: PredictionLog,
}

impl ChurnPredictor {
    pub fn new(artifacts: Artifacts, log: PredictionLog) -> Self {
        Self { artifacts, log }
    }

    /// Load artifacts from disk and open the log at `history`.
    pub fn open(
        paths: &ArtifactPaths,
        engineered: Option<MeanOffset>,
        history: impl AsRef<Path>,
    ) -> Result<Self, StartupError> {
        let artifacts = Artifacts::load(paths, engineered)?;
        let log = PredictionLog::new(history.as_ref(), artifacts.schema());
        Ok(Self::new(artifacts, log))
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn log(&self) -> &PredictionLog {
        &self.log
    }

    /// Transform, infer, then append to the history.
    ///
    /// A failed append is reported in [`PredictionOutcome::log_status`] and
    /// never changes the label.
    pub fn predict(&self, record: &RawRecord) -> Result<PredictionOutcome, PredictError> {
        let features = self.artifacts.transform.transform(record)?;
        let model = self.artifacts.model();
        let probability = model.predict_proba(&features)?;
        let label = model.predict(&features)?;
        tracing::debug!(label = label.as_u8(), probability, "scored record");

        let entry = LogEntry::new(self.logged_record(record), label);
        let log_status = match self.log.append(&entry) {
            Ok(()) => LogStatus::Recorded,
            Err(err) => {
                tracing::warn!(
                    path = %self.log.path().display(),
                    error = %err,
                    "failed to record prediction"
                );
                LogStatus::Failed(err)
            }
        };

        Ok(PredictionOutcome {
            label,
            probability,
            features,
            log_status,
        })
    }

    /// All historical predictions in insertion order.
    pub fn history(&self) -> Result<Vec<LogEntry>, LogError> {
        self.log.read_all()
    }

    pub fn summary(&self) -> Result<Option<PredictionSummary>, LogError> {
        self.log.summary()
    }

    // Input fields in schema order; the log fills in the identifier column.
    fn logged_record(&self, record: &RawRecord) -> RawRecord {
        self.artifacts
            .schema()
            .input_fields()
            .filter_map(|f| record.get(&f.name).map(|v| (f.name.clone(), v.clone())))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
