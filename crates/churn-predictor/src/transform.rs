//! Feature transform: raw record → encoded feature vector.
//!
//! [`FeatureTransform`] resolves, once at construction, where every column of
//! the schema's `column_order_out` comes from (a numeric field, the engineered
//! evening-minutes feature, a one-hot slot, or the identifier placeholder).
//! Encoding a record then only fills that plan, so the output order is fixed
//! by construction and a layout mismatch surfaces as a [`LayoutError`] at
//! startup rather than as a wrong vector at request time.

use std::collections::HashSet;
use std::sync::Arc;

use ndarray::{ArrayView2, Axis, aview1};
use serde::{Deserialize, Serialize};

use crate::encoder::CategoricalEncoder;
use crate::record::{FieldValue, RawRecord};
use crate::schema::{FieldType, Schema};

/// Mean evening minutes of the training population.
pub const MEAN_EVE_MINUTES: f64 = 200.29;

/// Field the evening-minutes adjustment reads and writes by default.
pub const EVE_MINUTES_FIELD: &str = "total_eve_minutes";

// =============================================================================
// Errors
// =============================================================================

/// Per-request encoding failure. Aborts the request, never the process.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("required field `{0}` is missing from the input")]
    MissingField(String),
    #[error("field `{0}` is not part of the schema")]
    UnknownField(String),
    #[error("field `{field}` has value `{value}`, which the encoder was not trained on")]
    UnknownCategory { field: String, value: String },
    #[error("field `{field}` expects {expected}, got `{got}`")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        got: String,
    },
}

/// The schema, encoder and engineered features cannot produce `column_order_out`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("output column `{0}` is not produced by any input field, encoder slot or engineered feature")]
    UnproducibleColumn(String),
    #[error("encoder column `{0}` is missing from the transformed column order")]
    UnusedEncoderColumn(String),
    #[error("categorical field `{0}` has no fitted encoder")]
    MissingEncoder(String),
    #[error("engineered feature reads `{0}`, which is not a numeric input field")]
    InvalidEngineeredSource(String),
}

// =============================================================================
// Engineered feature
// =============================================================================

/// Fixed trained-time adjustment: `output = baseline - source`.
///
/// `baseline` is preserved exactly as trained and never re-derived.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanOffset {
    pub source: String,
    pub output: String,
    pub baseline: f64,
}

impl Default for MeanOffset {
    fn default() -> Self {
        Self {
            source: EVE_MINUTES_FIELD.to_string(),
            output: EVE_MINUTES_FIELD.to_string(),
            baseline: MEAN_EVE_MINUTES,
        }
    }
}

impl MeanOffset {
    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        self.baseline - value
    }
}

// =============================================================================
// Encoded output
// =============================================================================

/// A single encoded row, columns in `column_order_out` order.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedFeatures {
    columns: Arc<[String]>,
    values: Vec<f32>,
}

impl EncodedFeatures {
    /// Pair already-ordered values with their column names.
    ///
    /// # Panics
    ///
    /// Panics if the lengths differ.
    pub fn new(columns: Arc<[String]>, values: Vec<f32>) -> Self {
        assert_eq!(columns.len(), values.len(), "one value per column");
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named column.
    pub fn get(&self, column: &str) -> Option<f32> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i])
    }

    /// The row as a `1 × n` table.
    pub fn as_table(&self) -> ArrayView2<'_, f32> {
        aview1(&self.values).insert_axis(Axis(0))
    }
}

// =============================================================================
// Transform
// =============================================================================

#[derive(Clone, Copy, Debug)]
enum ColumnSource {
    /// Numeric input passed through.
    Numeric { input: usize },
    /// Numeric input adjusted by the engineered offset.
    Engineered { input: usize },
    /// One-hot indicator for `category` of a categorical input.
    Indicator { input: usize, category: usize },
    /// Record identifier; always zero when scoring.
    IdPlaceholder,
}

#[derive(Clone, Debug)]
struct InputSlot {
    name: String,
    field_type: FieldType,
    /// Encoder feature index for categorical inputs.
    encoder: Option<usize>,
}

#[derive(Clone, Copy, Debug)]
enum Resolved {
    Number(f64),
    Category(usize),
}

/// Deterministic, stateless record encoder.
#[derive(Clone, Debug)]
pub struct FeatureTransform {
    schema: Arc<Schema>,
    encoder: Arc<CategoricalEncoder>,
    engineered: Option<MeanOffset>,
    inputs: Vec<InputSlot>,
    plan: Vec<ColumnSource>,
    columns: Arc<[String]>,
}

impl FeatureTransform {
    /// Compile the column plan for `schema.column_order_out()`.
    pub fn new(
        schema: Arc<Schema>,
        encoder: Arc<CategoricalEncoder>,
        engineered: Option<MeanOffset>,
    ) -> Result<Self, LayoutError> {
        let mut inputs = Vec::new();
        for field in schema.input_fields() {
            let encoder_idx = if field.field_type.is_categorical() {
                let idx = encoder
                    .features()
                    .iter()
                    .position(|f| f.name() == field.name)
                    .ok_or_else(|| LayoutError::MissingEncoder(field.name.clone()))?;
                Some(idx)
            } else {
                None
            };
            inputs.push(InputSlot {
                name: field.name.clone(),
                field_type: field.field_type,
                encoder: encoder_idx,
            });
        }

        let numeric_input = |name: &str| {
            inputs
                .iter()
                .position(|s| s.name == name && s.field_type.is_numeric())
        };

        let engineered_input = match &engineered {
            Some(e) => Some(
                numeric_input(&e.source)
                    .ok_or_else(|| LayoutError::InvalidEngineeredSource(e.source.clone()))?,
            ),
            None => None,
        };

        let mut plan = Vec::with_capacity(schema.column_order_out().len());
        for column in schema.column_order_out() {
            let engineered_here = engineered
                .as_ref()
                .zip(engineered_input)
                .filter(|(e, _)| *column == e.output)
                .map(|(_, input)| input);
            let source = if let Some(input) = engineered_here {
                ColumnSource::Engineered { input }
            } else if let Some(input) = numeric_input(column) {
                ColumnSource::Numeric { input }
            } else if let Some(source) = indicator_source(&inputs, &encoder, column) {
                source
            } else if schema.id_field() == Some(column.as_str()) {
                ColumnSource::IdPlaceholder
            } else {
                return Err(LayoutError::UnproducibleColumn(column.clone()));
            };
            plan.push(source);
        }

        let requested: HashSet<&str> = schema.column_order_out().iter().map(String::as_str).collect();
        for feature in encoder.features() {
            if !inputs.iter().any(|s| s.name == feature.name()) {
                continue;
            }
            if let Some(col) = feature.output_columns().find(|c| !requested.contains(c)) {
                return Err(LayoutError::UnusedEncoderColumn(col.to_string()));
            }
        }

        let columns: Arc<[String]> = schema.column_order_out().to_vec().into();
        Ok(Self {
            schema,
            encoder,
            engineered,
            inputs,
            plan,
            columns,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn encoder(&self) -> &CategoricalEncoder {
        &self.encoder
    }

    pub fn engineered(&self) -> Option<&MeanOffset> {
        self.engineered.as_ref()
    }

    /// Output column order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Encode one record.
    ///
    /// Every schema input field must be present with a value of its type.
    /// Unknown extra fields are ignored.
    pub fn transform(&self, record: &RawRecord) -> Result<EncodedFeatures, TransformError> {
        let resolved = self
            .inputs
            .iter()
            .map(|slot| self.resolve(slot, record))
            .collect::<Result<Vec<_>, _>>()?;

        let values = self
            .plan
            .iter()
            .map(|source| match *source {
                ColumnSource::Numeric { input } => number(resolved[input]) as f32,
                ColumnSource::Engineered { input } => {
                    let offset = self.engineered.as_ref().map_or(0.0, |e| e.apply(number(resolved[input])));
                    offset as f32
                }
                ColumnSource::Indicator { input, category } => match resolved[input] {
                    Resolved::Category(hot) if hot == category => 1.0,
                    _ => 0.0,
                },
                ColumnSource::IdPlaceholder => 0.0,
            })
            .collect::<Vec<f32>>();

        tracing::debug!(n_columns = values.len(), "encoded record");
        Ok(EncodedFeatures::new(Arc::clone(&self.columns), values))
    }

    fn resolve(&self, slot: &InputSlot, record: &RawRecord) -> Result<Resolved, TransformError> {
        let value = record
            .get(&slot.name)
            .ok_or_else(|| TransformError::MissingField(slot.name.clone()))?;
        let mismatch = || TransformError::TypeMismatch {
            field: slot.name.clone(),
            expected: slot.field_type,
            got: value.to_string(),
        };

        match (slot.field_type, value) {
            (FieldType::Integer, FieldValue::Int(v)) => Ok(Resolved::Number(*v as f64)),
            (FieldType::Float, FieldValue::Int(v)) => Ok(Resolved::Number(*v as f64)),
            (FieldType::Float, FieldValue::Float(v)) => Ok(Resolved::Number(*v)),
            (FieldType::Categorical, FieldValue::Category(c)) => {
                let feature = slot
                    .encoder
                    .and_then(|i| self.encoder.features().get(i))
                    .ok_or_else(|| TransformError::UnknownField(slot.name.clone()))?;
                feature
                    .category_index(c)
                    .map(Resolved::Category)
                    .ok_or_else(|| TransformError::UnknownCategory {
                        field: slot.name.clone(),
                        value: c.clone(),
                    })
            }
            _ => Err(mismatch()),
        }
    }
}

#[inline]
fn number(r: Resolved) -> f64 {
    match r {
        Resolved::Number(v) => v,
        Resolved::Category(_) => 0.0,
    }
}

fn indicator_source(
    inputs: &[InputSlot],
    encoder: &CategoricalEncoder,
    column: &str,
) -> Option<ColumnSource> {
    inputs.iter().enumerate().find_map(|(input, slot)| {
        let feature = encoder.features().get(slot.encoder?)?;
        let category = feature
            .categories()
            .iter()
            .position(|c| format!("{}_{c}", feature.name()) == column)?;
        (feature.dropped() != Some(feature.categories()[category].as_str()))
            .then_some(ColumnSource::Indicator { input, category })
    })
}

// =============================================================================
// Tests
// =============================================================================
