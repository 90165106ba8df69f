//! Input schema definitions.
//!
//! The schema describes every field a customer record carries (name, type and
//! domain) together with the canonical column order the model was trained on.
//! It is loaded once at startup from the JSON document written next to the
//! model artifacts and is immutable afterwards.
//!
//! # Document format
//!
//! ```json
//! {
//!   "column_info": {
//!     "id": {"dtype": "int64", "values": [1, 4250]},
//!     "tenure": {"dtype": "int64", "values": [1, 72]},
//!     "promotions_offered": {"dtype": "object", "values": ["N", "Y"]},
//!     "churn": {"dtype": "int64", "values": [0, 1]}
//!   },
//!   "transformed_columns": {"transformed_columns": ["tenure", "promotions_offered_N", "promotions_offered_Y"]}
//! }
//! ```
//!
//! Field order is preserved. The last field is the target label unless the
//! document names one with a top-level `"target"` key; a field named `id` is
//! the record identifier unless `"id_field"` says otherwise.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use serde_with::serde_as;

use crate::record::{FieldValue, RawRecord};
use crate::transform::TransformError;

/// Name of the identifier field when the document does not specify one.
pub const DEFAULT_ID_FIELD: &str = "id";

// =============================================================================
// Errors
// =============================================================================

/// Error raised while loading a schema document.
///
/// Any of these is fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("failed to read schema {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed schema document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("schema has no fields")]
    Empty,
    #[error("field `{0}` is declared more than once")]
    DuplicateField(String),
    #[error("numeric field `{field}` must have a [min, max] domain, got {got}")]
    InvalidRange { field: String, got: String },
    #[error("numeric field `{field}` has min {min} greater than max {max}")]
    InvertedRange { field: String, min: f64, max: f64 },
    #[error("categorical field `{0}` has no categories")]
    EmptyCategories(String),
    #[error("categorical field `{field}` has unsupported category value {value}")]
    InvalidCategory { field: String, value: String },
    #[error("target field `{0}` is not declared")]
    UnknownTarget(String),
    #[error("transformed column list is empty")]
    NoOutputColumns,
    #[error("transformed column `{0}` is listed more than once")]
    DuplicateOutputColumn(String),
    #[error("field `{field}` is {field_type} but its domain is not")]
    DomainMismatch { field: String, field_type: FieldType },
}

// =============================================================================
// Field types
// =============================================================================

/// Logical type of a schema field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum FieldType {
    /// Whole numbers (`int64`).
    #[serde(rename = "int64", alias = "int", alias = "int32")]
    Integer,
    /// Real numbers (`float64`).
    #[serde(rename = "float64", alias = "float", alias = "float32")]
    Float,
    /// Finite category set (`object`).
    #[serde(rename = "object", alias = "category", alias = "categorical")]
    Categorical,
}

impl FieldType {
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    #[inline]
    pub fn is_categorical(&self) -> bool {
        matches!(self, FieldType::Categorical)
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Integer => write!(f, "int64"),
            FieldType::Float => write!(f, "float64"),
            FieldType::Categorical => write!(f, "object"),
        }
    }
}

/// Allowed values of a field.
#[derive(Clone, Debug, PartialEq)]
pub enum Domain {
    /// Inclusive numeric range.
    Range { min: f64, max: f64 },
    /// Ordered category list.
    Categories(Vec<String>),
}

/// A single declared field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub domain: Domain,
}

impl FieldSpec {
    /// Categories of a categorical field, empty for numeric fields.
    pub fn categories(&self) -> &[String] {
        match &self.domain {
            Domain::Categories(c) => c,
            Domain::Range { .. } => &[],
        }
    }

    /// Value a freshly opened form shows for this field.
    ///
    /// Numeric fields start at the midpoint of their range (truncated for
    /// integers), categorical fields at their first category.
    pub fn default_value(&self) -> FieldValue {
        match (&self.domain, self.field_type) {
            (Domain::Range { min, max }, FieldType::Integer) => {
                FieldValue::Int(((min + max) / 2.0).trunc() as i64)
            }
            (Domain::Range { min, max }, _) => FieldValue::Float((min + max) / 2.0),
            (Domain::Categories(c), _) => {
                FieldValue::Category(c.first().cloned().unwrap_or_default())
            }
        }
    }

    /// Check the domain fits the type and is non-empty.
    pub fn validate(&self) -> Result<(), SchemaError> {
        match (&self.domain, self.field_type) {
            (Domain::Range { min, max }, FieldType::Integer | FieldType::Float) => {
                if matches!(min.partial_cmp(max), None | Some(std::cmp::Ordering::Greater)) {
                    return Err(SchemaError::InvertedRange {
                        field: self.name.clone(),
                        min: *min,
                        max: *max,
                    });
                }
                Ok(())
            }
            (Domain::Categories(c), FieldType::Categorical) => {
                if c.is_empty() {
                    return Err(SchemaError::EmptyCategories(self.name.clone()));
                }
                Ok(())
            }
            _ => Err(SchemaError::DomainMismatch {
                field: self.name.clone(),
                field_type: self.field_type,
            }),
        }
    }

    /// Coerce textual input to this field's type.
    pub fn coerce(&self, raw: &str) -> Result<FieldValue, TransformError> {
        let raw = raw.trim();
        let mismatch = || TransformError::TypeMismatch {
            field: self.name.clone(),
            expected: self.field_type,
            got: raw.to_string(),
        };
        match self.field_type {
            FieldType::Integer => raw.parse::<i64>().map(FieldValue::Int).map_err(|_| mismatch()),
            FieldType::Float => raw.parse::<f64>().map(FieldValue::Float).map_err(|_| mismatch()),
            FieldType::Categorical => {
                if self.categories().iter().any(|c| c == raw) {
                    Ok(FieldValue::Category(raw.to_string()))
                } else {
                    Err(TransformError::UnknownCategory {
                        field: self.name.clone(),
                        value: raw.to_string(),
                    })
                }
            }
        }
    }
}

// =============================================================================
// Schema document (foreign layout)
// =============================================================================

#[derive(Debug, Deserialize)]
struct ColumnInfoDoc {
    dtype: FieldType,
    values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TransformedColumnsDoc {
    transformed_columns: Vec<String>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct SchemaDoc {
    #[serde_as(as = "serde_with::Map<_, _>")]
    column_info: Vec<(String, ColumnInfoDoc)>,
    transformed_columns: TransformedColumnsDoc,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    id_field: Option<String>,
}

fn numeric_bound(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn convert_field(name: String, doc: ColumnInfoDoc) -> Result<FieldSpec, SchemaError> {
    let domain = match doc.dtype {
        FieldType::Integer | FieldType::Float => {
            let bounds: Vec<f64> = doc.values.iter().filter_map(numeric_bound).collect();
            let [min, max] = bounds[..] else {
                return Err(SchemaError::InvalidRange {
                    field: name,
                    got: Value::Array(doc.values).to_string(),
                });
            };
            if bounds.len() != doc.values.len() {
                return Err(SchemaError::InvalidRange {
                    field: name,
                    got: Value::Array(doc.values).to_string(),
                });
            }
            Domain::Range { min, max }
        }
        FieldType::Categorical => {
            let mut categories = Vec::with_capacity(doc.values.len());
            for v in doc.values {
                match v {
                    Value::String(s) => categories.push(s),
                    Value::Number(n) => categories.push(n.to_string()),
                    Value::Bool(b) => categories.push(b.to_string()),
                    other => {
                        return Err(SchemaError::InvalidCategory {
                            field: name,
                            value: other.to_string(),
                        });
                    }
                }
            }
            Domain::Categories(categories)
        }
    };
    Ok(FieldSpec {
        name,
        field_type: doc.dtype,
        domain,
    })
}

// =============================================================================
// Schema
// =============================================================================

/// Immutable description of the model's input.
#[derive(Clone, Debug)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    target: String,
    id_field: Option<String>,
    column_order_out: Vec<String>,
}

impl Schema {
    /// Build a schema from already-typed parts.
    ///
    /// `target` must name one of `fields`. `id_field` is ignored when no
    /// field carries that name.
    pub fn new(
        fields: Vec<FieldSpec>,
        target: impl Into<String>,
        id_field: Option<String>,
        column_order_out: Vec<String>,
    ) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen = HashSet::new();
        for f in &fields {
            if !seen.insert(f.name.as_str()) {
                return Err(SchemaError::DuplicateField(f.name.clone()));
            }
            f.validate()?;
        }

        let target = target.into();
        if !seen.contains(target.as_str()) {
            return Err(SchemaError::UnknownTarget(target));
        }
        let id_field = id_field.filter(|id| seen.contains(id.as_str()));

        if column_order_out.is_empty() {
            return Err(SchemaError::NoOutputColumns);
        }
        let mut seen_out = HashSet::new();
        for c in &column_order_out {
            if !seen_out.insert(c.as_str()) {
                return Err(SchemaError::DuplicateOutputColumn(c.clone()));
            }
        }

        Ok(Self {
            fields,
            target,
            id_field,
            column_order_out,
        })
    }

    /// Parse a schema document.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let doc: SchemaDoc = serde_json::from_str(json)?;
        let target = match doc.target {
            Some(t) => t,
            None => doc
                .column_info
                .last()
                .map(|(name, _)| name.clone())
                .ok_or(SchemaError::Empty)?,
        };
        let id_field = doc.id_field.or_else(|| Some(DEFAULT_ID_FIELD.to_string()));

        let fields = doc
            .column_info
            .into_iter()
            .map(|(name, info)| convert_field(name, info))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(
            fields,
            target,
            id_field,
            doc.transformed_columns.transformed_columns,
        )
    }

    /// Load a schema document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Every declared field, in document order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Fields a raw record must carry: everything except target and identifier.
    pub fn input_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(move |f| f.name != self.target && Some(&f.name) != self.id_field.as_ref())
    }

    /// Names of [`input_fields`](Self::input_fields).
    pub fn input_field_names(&self) -> Vec<String> {
        self.input_fields().map(|f| f.name.clone()).collect()
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Target label field.
    pub fn target_field(&self) -> &str {
        &self.target
    }

    /// Record identifier field, if declared.
    pub fn id_field(&self) -> Option<&str> {
        self.id_field.as_deref()
    }

    /// Canonical post-encoding column order.
    pub fn column_order_out(&self) -> &[String] {
        &self.column_order_out
    }

    /// Coerce textual input for a named input field.
    pub fn coerce(&self, field: &str, raw: &str) -> Result<FieldValue, TransformError> {
        self.input_fields()
            .find(|f| f.name == field)
            .ok_or_else(|| TransformError::UnknownField(field.to_string()))?
            .coerce(raw)
    }

    /// A record holding every input field's default value.
    pub fn default_record(&self) -> RawRecord {
        self.input_fields()
            .map(|f| (f.name.clone(), f.default_value()))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn doc() -> serde_json::Value {
        json!({
            "column_info": {
                "id": {"dtype": "int64", "values": [1, 100]},
                "tenure": {"dtype": "int64", "values": [1, 72]},
                "total_eve_minutes": {"dtype": "float64", "values": [0.0, 363.7]},
                "promotions_offered": {"dtype": "object", "values": ["N", "Y"]},
                "area_code": {"dtype": "object", "values": [408, 415, 510]},
                "churn": {"dtype": "int64", "values": [0, 1]}
            },
            "transformed_columns": {"transformed_columns": ["tenure", "total_eve_minutes"]}
        })
    }

    #[test]
    fn preserves_document_order_and_drops_target_and_id() {
        let schema = Schema::from_json_str(&doc().to_string()).unwrap();
        assert_eq!(schema.target_field(), "churn");
        assert_eq!(schema.id_field(), Some("id"));
        assert_eq!(
            schema.input_field_names(),
            ["tenure", "total_eve_minutes", "promotions_offered", "area_code"]
        );
        assert_eq!(
            schema.field("area_code").unwrap().categories(),
            ["408", "415", "510"]
        );
    }

    #[test]
    fn explicit_target_overrides_last_field() {
        let mut d = doc();
        d["target"] = json!("promotions_offered");
        let schema = Schema::from_json_str(&d.to_string()).unwrap();
        assert_eq!(schema.target_field(), "promotions_offered");
        assert!(schema.input_field_names().contains(&"churn".to_string()));
    }

    #[test]
    fn default_record_uses_midpoints_and_first_category() {
        let schema = Schema::from_json_str(&doc().to_string()).unwrap();
        let record = schema.default_record();
        assert_eq!(record.get("tenure"), Some(&FieldValue::Int(36)));
        assert_eq!(record.get("total_eve_minutes"), Some(&FieldValue::Float(181.85)));
        assert_eq!(
            record.get("promotions_offered"),
            Some(&FieldValue::Category("N".into()))
        );
        assert_eq!(record.get("id"), None);
    }

    #[rstest]
    #[case("tenure", "24", FieldValue::Int(24))]
    #[case("total_eve_minutes", " 199.5 ", FieldValue::Float(199.5))]
    #[case("promotions_offered", "Y", FieldValue::Category("Y".into()))]
    fn coerces_text_per_field_type(
        #[case] field: &str,
        #[case] raw: &str,
        #[case] expected: FieldValue,
    ) {
        let schema = Schema::from_json_str(&doc().to_string()).unwrap();
        assert_eq!(schema.coerce(field, raw).unwrap(), expected);
    }

    #[rstest]
    #[case("tenure", "2.5")]
    #[case("total_eve_minutes", "lots")]
    fn rejects_uncoercible_text(#[case] field: &str, #[case] raw: &str) {
        let schema = Schema::from_json_str(&doc().to_string()).unwrap();
        assert!(matches!(
            schema.coerce(field, raw),
            Err(TransformError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn coerce_rejects_unknown_category_and_field() {
        let schema = Schema::from_json_str(&doc().to_string()).unwrap();
        assert!(matches!(
            schema.coerce("promotions_offered", "maybe"),
            Err(TransformError::UnknownCategory { .. })
        ));
        assert!(matches!(
            schema.coerce("churn", "1"),
            Err(TransformError::UnknownField(_))
        ));
    }

    #[test]
    fn rejects_malformed_documents() {
        let mut d = doc();
        d["column_info"]["tenure"]["values"] = json!([1]);
        assert!(matches!(
            Schema::from_json_str(&d.to_string()),
            Err(SchemaError::InvalidRange { .. })
        ));

        let mut d = doc();
        d["column_info"]["tenure"]["values"] = json!([72, 1]);
        assert!(matches!(
            Schema::from_json_str(&d.to_string()),
            Err(SchemaError::InvertedRange { .. })
        ));

        let mut d = doc();
        d["column_info"]["promotions_offered"]["values"] = json!([]);
        assert!(matches!(
            Schema::from_json_str(&d.to_string()),
            Err(SchemaError::EmptyCategories(_))
        ));

        let mut d = doc();
        d["transformed_columns"]["transformed_columns"] = json!(["tenure", "tenure"]);
        assert!(matches!(
            Schema::from_json_str(&d.to_string()),
            Err(SchemaError::DuplicateOutputColumn(_))
        ));

        assert!(matches!(
            Schema::from_json_str("{\"column_info\": "),
            Err(SchemaError::Parse(_))
        ));
    }

    #[rstest]
    #[case(FieldType::Categorical, Domain::Categories(vec![]))]
    #[case(FieldType::Integer, Domain::Range { min: 10.0, max: 1.0 })]
    #[case(FieldType::Float, Domain::Range { min: f64::NAN, max: 1.0 })]
    #[case(FieldType::Categorical, Domain::Range { min: 0.0, max: 1.0 })]
    #[case(FieldType::Integer, Domain::Categories(vec!["a".into()]))]
    fn new_validates_domains(#[case] field_type: FieldType, #[case] domain: Domain) {
        let fields = vec![
            FieldSpec {
                name: "x".into(),
                field_type,
                domain,
            },
            FieldSpec {
                name: "churn".into(),
                field_type: FieldType::Integer,
                domain: Domain::Range { min: 0.0, max: 1.0 },
            },
        ];
        assert!(matches!(
            Schema::new(fields, "churn", None, vec!["x".into()]),
            Err(SchemaError::EmptyCategories(_)
                | SchemaError::InvertedRange { .. }
                | SchemaError::DomainMismatch { .. })
        ));
    }

    #[test]
    fn default_value_of_empty_categories_does_not_panic() {
        let field = FieldSpec {
            name: "x".into(),
            field_type: FieldType::Categorical,
            domain: Domain::Categories(vec![]),
        };
        assert_eq!(field.default_value(), FieldValue::Category(String::new()));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Schema::load("/definitely/not/here/schema.json").unwrap_err();
        assert!(matches!(err, SchemaError::Io { .. }));
    }
}
