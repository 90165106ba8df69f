//! Pre-fitted one-hot encoder for categorical fields.
//!
//! The encoder is a frozen artifact of training: for every categorical field it
//! knows the ordered category list the model saw, and optionally one dropped
//! category that encodes as all zeros. Output columns are named
//! `<field>_<category>`.
//!
//! # Artifact format
//!
//! ```json
//! {
//!   "features": [
//!     {"name": "promotions_offered", "categories": ["N", "Y"]},
//!     {"name": "international_plan", "categories": ["no", "yes"], "drop": "no"}
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::schema::Schema;
use crate::transform::TransformError;

/// Error raised while loading an encoder artifact.
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to read encoder {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed encoder artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("feature `{0}` is encoded more than once")]
    DuplicateFeature(String),
    #[error("feature `{0}` has no categories")]
    EmptyCategories(String),
    #[error("feature `{feature}` lists category `{category}` more than once")]
    DuplicateCategory { feature: String, category: String },
    #[error("feature `{feature}` drops unknown category `{category}`")]
    UnknownDrop { feature: String, category: String },
}

#[derive(Debug, Deserialize)]
struct FeatureDoc {
    name: String,
    categories: Vec<String>,
    #[serde(default)]
    drop: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EncoderDoc {
    features: Vec<FeatureDoc>,
}

/// One-hot layout for a single categorical field.
#[derive(Clone, Debug)]
pub struct OneHotFeature {
    name: String,
    categories: Vec<String>,
    drop: Option<usize>,
    /// Column name per category; `None` for the dropped one.
    columns: Vec<Option<String>>,
}

impl OneHotFeature {
    pub fn new(
        name: impl Into<String>,
        categories: Vec<String>,
        drop: Option<&str>,
    ) -> Result<Self, EncoderError> {
        let name = name.into();
        if categories.is_empty() {
            return Err(EncoderError::EmptyCategories(name));
        }
        let mut seen = HashSet::new();
        for c in &categories {
            if !seen.insert(c.as_str()) {
                return Err(EncoderError::DuplicateCategory {
                    feature: name,
                    category: c.clone(),
                });
            }
        }
        let drop = match drop {
            Some(d) => match categories.iter().position(|c| c == d) {
                Some(idx) => Some(idx),
                None => {
                    return Err(EncoderError::UnknownDrop {
                        feature: name,
                        category: d.to_string(),
                    });
                }
            },
            None => None,
        };
        let columns = categories
            .iter()
            .enumerate()
            .map(|(i, c)| (Some(i) != drop).then(|| format!("{name}_{c}")))
            .collect();

        Ok(Self {
            name,
            categories,
            drop,
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn dropped(&self) -> Option<&str> {
        self.drop.map(|i| self.categories[i].as_str())
    }

    /// Output column names in category order, dropped category excluded.
    pub fn output_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().filter_map(|c| c.as_deref())
    }

    /// Index of `value` among the trained categories.
    #[inline]
    pub fn category_index(&self, value: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == value)
    }

    /// One-hot slice for `value`: one `(column, indicator)` pair per output column.
    pub fn encode(&self, value: &str) -> Result<Vec<(&str, f32)>, TransformError> {
        let hot = self
            .category_index(value)
            .ok_or_else(|| TransformError::UnknownCategory {
                field: self.name.clone(),
                value: value.to_string(),
            })?;
        Ok(self
            .columns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_deref().map(|c| (c, if i == hot { 1.0 } else { 0.0 })))
            .collect())
    }
}

/// Immutable encoder shared by every request.
#[derive(Clone, Debug, Default)]
pub struct CategoricalEncoder {
    features: Vec<OneHotFeature>,
}

impl CategoricalEncoder {
    pub fn new(features: Vec<OneHotFeature>) -> Result<Self, EncoderError> {
        let mut seen = HashSet::new();
        for f in &features {
            if !seen.insert(f.name.as_str()) {
                return Err(EncoderError::DuplicateFeature(f.name.clone()));
            }
        }
        Ok(Self { features })
    }

    /// Encoder over every categorical field of `schema`, categories in schema order.
    ///
    /// Matches the artifact a training run produces when the schema domains
    /// were taken from the training data.
    pub fn from_schema(schema: &Schema) -> Result<Self, EncoderError> {
        let features = schema
            .input_fields()
            .filter(|f| f.field_type.is_categorical())
            .map(|f| OneHotFeature::new(f.name.clone(), f.categories().to_vec(), None))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(features)
    }

    /// Parse an encoder artifact.
    pub fn from_json_str(json: &str) -> Result<Self, EncoderError> {
        let doc: EncoderDoc = serde_json::from_str(json)?;
        let features = doc
            .features
            .into_iter()
            .map(|f| OneHotFeature::new(f.name, f.categories, f.drop.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(features)
    }

    /// Load an encoder artifact from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EncoderError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| EncoderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn features(&self) -> &[OneHotFeature] {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<&OneHotFeature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Every output column, feature by feature.
    pub fn output_columns(&self) -> Vec<String> {
        self.features
            .iter()
            .flat_map(|f| f.output_columns().map(str::to_string))
            .collect()
    }

    /// One-hot slice for a single field value.
    pub fn encode(&self, field: &str, value: &str) -> Result<Vec<(&str, f32)>, TransformError> {
        self.feature(field)
            .ok_or_else(|| TransformError::UnknownField(field.to_string()))?
            .encode(value)
    }
}
