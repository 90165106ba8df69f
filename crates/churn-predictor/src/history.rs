//! Append-only prediction log.
//!
//! Every scored request is recorded as one CSV row: the schema fields other
//! than the target, in schema order, followed by the integer `prediction`
//! (0 = not churn, 1 = churn). The identifier column is always written as
//! `0` and ignored on read. The file is plain UTF-8 CSV with a header row, so
//! any tabular reader can load it directly. Rows are never updated or deleted.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::model::ChurnLabel;
use crate::record::{FieldValue, RawRecord};
use crate::schema::{FieldSpec, FieldType, Schema};

/// Trailing column holding the predicted class.
pub const PREDICTION_COLUMN: &str = "prediction";

/// Value written to the identifier column.
const ID_PLACEHOLDER: &str = "0";

// =============================================================================
// Errors
// =============================================================================

/// Failure reading or writing the log.
///
/// The scoring pipeline reports write failures without failing the request.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("prediction log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("prediction log {path} is not valid CSV: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("prediction log {path} has header {found:?}, expected {expected:?}")]
    HeaderMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("prediction log {path}, row {row}: {reason}")]
    InvalidRow {
        path: PathBuf,
        row: usize,
        reason: String,
    },
    #[error("prediction log {path} ends with an unterminated row")]
    UnterminatedRow { path: PathBuf },
    #[error("entry is missing field `{0}`")]
    IncompleteEntry(String),
}

// =============================================================================
// Entries and aggregates
// =============================================================================

/// One historical prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub record: RawRecord,
    pub prediction: ChurnLabel,
}

impl LogEntry {
    pub fn new(record: RawRecord, prediction: ChurnLabel) -> Self {
        Self { record, prediction }
    }
}

/// Outcome counts over the whole history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PredictionSummary {
    pub not_churn: usize,
    pub churn: usize,
}

impl PredictionSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Self {
        entries
            .into_iter()
            .fold(Self::default(), |mut acc, e| {
                match e.prediction {
                    ChurnLabel::NotChurn => acc.not_churn += 1,
                    ChurnLabel::Churn => acc.churn += 1,
                }
                acc
            })
    }

    pub fn total(&self) -> usize {
        self.not_churn + self.churn
    }

    /// Bar chart rows: `("not churn", n0)`, `("churn", n1)`.
    pub fn occurrences(&self) -> [(&'static str, usize); 2] {
        [("not churn", self.not_churn), ("churn", self.churn)]
    }
}

impl std::fmt::Display for PredictionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "not churn: {}, churn: {}", self.not_churn, self.churn)
    }
}

// =============================================================================
// PredictionLog
// =============================================================================

#[derive(Clone, Debug)]
enum LogColumn {
    Id(String),
    Field(FieldSpec),
}

impl LogColumn {
    fn name(&self) -> &str {
        match self {
            LogColumn::Id(name) => name,
            LogColumn::Field(field) => &field.name,
        }
    }
}

/// Persistent prediction history backed by one CSV file.
///
/// Appends within a process are serialized; each append writes its bytes
/// with a single `write_all` on an `O_APPEND` handle and syncs before
/// returning. A failed write is truncated away, so a row is either complete
/// or absent.
#[derive(Debug)]
pub struct PredictionLog {
    path: PathBuf,
    columns: Vec<LogColumn>,
    write_lock: Mutex<()>,
}

impl PredictionLog {
    /// Log at `path` whose columns are `schema`'s fields minus the target.
    ///
    /// The file is not touched until the first append.
    pub fn new(path: impl Into<PathBuf>, schema: &Schema) -> Self {
        let columns = schema
            .fields()
            .iter()
            .filter(|f| f.name != schema.target_field())
            .map(|f| {
                if Some(f.name.as_str()) == schema.id_field() {
                    LogColumn::Id(f.name.clone())
                } else {
                    LogColumn::Field(f.clone())
                }
            })
            .collect();
        Self {
            path: path.into(),
            columns,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column names as stored in the file, ending with [`PREDICTION_COLUMN`].
    pub fn header(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.name().to_string())
            .chain(std::iter::once(PREDICTION_COLUMN.to_string()))
            .collect()
    }

    /// Header without the identifier column, matching [`LogEntry`] records.
    pub fn display_header(&self) -> Vec<String> {
        self.fields()
            .map(|f| f.name.clone())
            .chain(std::iter::once(PREDICTION_COLUMN.to_string()))
            .collect()
    }

    fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.columns.iter().filter_map(|c| match c {
            LogColumn::Field(field) => Some(field),
            LogColumn::Id(_) => None,
        })
    }

    /// Append one entry, creating the file with a header if needed.
    pub fn append(&self, entry: &LogEntry) -> Result<(), LogError> {
        let row = self.row_for(entry)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let existing_len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(self.io_error(e)),
        };
        let new_file = existing_len == 0;
        if !new_file {
            let found = self.read_header()?;
            self.check_header(found)?;
            self.check_terminated(existing_len)?;
        }

        let mut buf = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut buf);
            if new_file {
                writer
                    .write_record(self.header())
                    .map_err(|e| self.csv_error(e))?;
            }
            writer.write_record(&row).map_err(|e| self.csv_error(e))?;
            writer.flush().map_err(|e| self.io_error(e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        if let Err(e) = file.write_all(&buf).and_then(|()| file.sync_data()) {
            if let Err(truncate) = file.set_len(existing_len) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %truncate,
                    "could not roll back partial prediction row"
                );
            }
            return Err(self.io_error(e));
        }

        tracing::debug!(
            path = %self.path.display(),
            prediction = entry.prediction.as_u8(),
            created = new_file,
            "appended prediction"
        );
        Ok(())
    }

    /// Every entry in insertion order. A missing or empty file has no entries.
    ///
    /// An unterminated final row is skipped.
    pub fn read_all(&self) -> Result<Vec<LogEntry>, LogError> {
        let mut bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        if bytes.last().is_some_and(|&b| b != b'\n') {
            let keep = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
            tracing::warn!(
                path = %self.path.display(),
                skipped = bytes.len() - keep,
                "ignoring unterminated row at end of prediction log"
            );
            bytes.truncate(keep);
        }
        if bytes.is_empty() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let found: Vec<String> = reader
            .headers()
            .map_err(|e| self.csv_error(e))?
            .iter()
            .map(str::to_string)
            .collect();
        self.check_header(found)?;

        let mut entries = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let row = idx + 1;
            let record = result.map_err(|e| self.csv_error(e))?;
            entries.push(self.parse_row(row, &record)?);
        }
        Ok(entries)
    }

    /// Outcome counts, or `None` when there is no historical data.
    pub fn summary(&self) -> Result<Option<PredictionSummary>, LogError> {
        let entries = self.read_all()?;
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(PredictionSummary::from_entries(&entries)))
    }

    fn row_for(&self, entry: &LogEntry) -> Result<Vec<String>, LogError> {
        let mut row = Vec::with_capacity(self.columns.len() + 1);
        for column in &self.columns {
            match column {
                LogColumn::Id(_) => row.push(ID_PLACEHOLDER.to_string()),
                LogColumn::Field(field) => {
                    let value = entry
                        .record
                        .get(&field.name)
                        .ok_or_else(|| LogError::IncompleteEntry(field.name.clone()))?;
                    row.push(value.to_string());
                }
            }
        }
        row.push(entry.prediction.as_u8().to_string());
        Ok(row)
    }

    fn read_header(&self) -> Result<Vec<String>, LogError> {
        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| self.csv_error(e))?;
        let headers = reader.headers().map_err(|e| self.csv_error(e))?;
        Ok(headers.iter().map(str::to_string).collect())
    }

    fn check_terminated(&self, len: u64) -> Result<(), LogError> {
        let mut file = fs::File::open(&self.path).map_err(|e| self.io_error(e))?;
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|e| self.io_error(e))?;
        if last[0] != b'\n' {
            return Err(LogError::UnterminatedRow {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    fn check_header(&self, found: Vec<String>) -> Result<(), LogError> {
        let expected = self.header();
        if found != expected {
            return Err(LogError::HeaderMismatch {
                path: self.path.clone(),
                expected,
                found,
            });
        }
        Ok(())
    }

    fn parse_row(&self, row: usize, record: &csv::StringRecord) -> Result<LogEntry, LogError> {
        let invalid = |reason: String| LogError::InvalidRow {
            path: self.path.clone(),
            row,
            reason,
        };
        if record.len() != self.columns.len() + 1 {
            return Err(invalid(format!(
                "expected {} columns, found {}",
                self.columns.len() + 1,
                record.len()
            )));
        }

        let mut values = RawRecord::new();
        for (column, text) in self.columns.iter().zip(record.iter()) {
            let LogColumn::Field(field) = column else {
                continue;
            };
            let value = parse_logged_value(field, text).ok_or_else(|| {
                invalid(format!("`{text}` is not a valid {} for `{}`", field.field_type, field.name))
            })?;
            values.set(field.name.clone(), value);
        }

        let text = &record[self.columns.len()];
        let prediction = text
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|v| ChurnLabel::try_from(v).ok())
            .ok_or_else(|| invalid(format!("`{text}` is not a prediction (0 or 1)")))?;

        Ok(LogEntry::new(values, prediction))
    }

    fn io_error(&self, source: io::Error) -> LogError {
        LogError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> LogError {
        LogError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

/// Parse a logged value by type only; historical categories are kept even if
/// the current schema no longer lists them.
fn parse_logged_value(field: &FieldSpec, text: &str) -> Option<FieldValue> {
    match field.field_type {
        FieldType::Integer => text.trim().parse().ok().map(FieldValue::Int),
        FieldType::Float => text.trim().parse().ok().map(FieldValue::Float),
        FieldType::Categorical => Some(FieldValue::Category(text.to_string())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Domain;

    fn schema() -> Schema {
        let fields = vec![
            FieldSpec {
                name: "tenure".into(),
                field_type: FieldType::Integer,
                domain: Domain::Range { min: 1.0, max: 72.0 },
            },
            FieldSpec {
                name: "state_code".into(),
                field_type: FieldType::Categorical,
                domain: Domain::Categories(vec!["KS".into(), "OH".into()]),
            },
            FieldSpec {
                name: "churn".into(),
                field_type: FieldType::Integer,
                domain: Domain::Range { min: 0.0, max: 1.0 },
            },
        ];
        Schema::new(fields, "churn", None, vec!["tenure".into()]).unwrap()
    }

    fn schema_with_id() -> Schema {
        let mut fields = schema().fields().to_vec();
        fields.insert(
            0,
            FieldSpec {
                name: "id".into(),
                field_type: FieldType::Integer,
                domain: Domain::Range { min: 0.0, max: 1e9 },
            },
        );
        Schema::new(fields, "churn", Some("id".into()), vec!["id".into(), "tenure".into()]).unwrap()
    }

    fn entry(tenure: i64, state: &str, prediction: ChurnLabel) -> LogEntry {
        LogEntry::new(
            RawRecord::new().with("tenure", tenure).with("state_code", state),
            prediction,
        )
    }

    #[test]
    fn creates_file_with_header_then_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("historical_data.csv"), &schema());
        log.append(&entry(24, "KS", ChurnLabel::Churn)).unwrap();
        log.append(&entry(3, "OH", ChurnLabel::NotChurn)).unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(text, "tenure,state_code,prediction\n24,KS,1\n3,OH,0\n");
    }

    #[test]
    fn quotes_values_containing_commas() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("log.csv"), &schema());
        log.append(&entry(1, "KS, north", ChurnLabel::Churn)).unwrap();
        let back = log.read_all().unwrap();
        assert_eq!(back[0].record.get("state_code"), Some(&FieldValue::Category("KS, north".into())));
    }

    #[test]
    fn missing_and_empty_files_read_as_no_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let log = PredictionLog::new(&path, &schema());
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.summary().unwrap(), None);

        fs::write(&path, "").unwrap();
        assert!(log.read_all().unwrap().is_empty());
        log.append(&entry(5, "OH", ChurnLabel::NotChurn)).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn incomplete_entry_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("log.csv"), &schema());
        let partial = LogEntry::new(RawRecord::new().with("tenure", 5), ChurnLabel::Churn);
        assert!(matches!(
            log.append(&partial),
            Err(LogError::IncompleteEntry(ref f)) if f == "state_code"
        ));
        assert!(!log.path().exists());
    }

    #[test]
    fn foreign_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "id,tenure,prediction\n0,5,1\n").unwrap();
        let log = PredictionLog::new(&path, &schema());
        assert!(matches!(
            log.append(&entry(5, "OH", ChurnLabel::NotChurn)),
            Err(LogError::HeaderMismatch { .. })
        ));
        assert!(matches!(log.read_all(), Err(LogError::HeaderMismatch { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "id,tenure,prediction\n0,5,1\n");
    }

    #[test]
    fn id_column_is_written_as_placeholder_and_dropped_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::new(dir.path().join("log.csv"), &schema_with_id());
        assert_eq!(log.header(), ["id", "tenure", "state_code", "prediction"]);
        assert_eq!(log.display_header(), ["tenure", "state_code", "prediction"]);

        log.append(&entry(24, "KS", ChurnLabel::Churn)).unwrap();
        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(text, "id,tenure,state_code,prediction\n0,24,KS,1\n");

        let back = log.read_all().unwrap();
        assert_eq!(back, vec![entry(24, "KS", ChurnLabel::Churn)]);
        assert!(back[0].record.get("id").is_none());
    }

    #[test]
    fn existing_log_with_ids_is_read_and_extended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("historical_data.csv");
        fs::write(&path, "id,tenure,state_code,prediction\n17,5,OH,0\n").unwrap();
        let log = PredictionLog::new(&path, &schema_with_id());

        assert_eq!(log.read_all().unwrap(), vec![entry(5, "OH", ChurnLabel::NotChurn)]);
        log.append(&entry(2, "KS", ChurnLabel::Churn)).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "id,tenure,state_code,prediction\n17,5,OH,0\n0,2,KS,1\n"
        );
        assert_eq!(log.summary().unwrap(), Some(PredictionSummary { not_churn: 1, churn: 1 }));
    }

    #[test]
    fn unterminated_tail_blocks_appends_and_is_skipped_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let log = PredictionLog::new(&path, &schema());
        log.append(&entry(24, "KS", ChurnLabel::Churn)).unwrap();
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"3,O")
            .unwrap();
        let torn = fs::read_to_string(&path).unwrap();

        assert!(matches!(
            log.append(&entry(3, "OH", ChurnLabel::NotChurn)),
            Err(LogError::UnterminatedRow { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), torn);
        assert_eq!(log.read_all().unwrap(), vec![entry(24, "KS", ChurnLabel::Churn)]);
    }

    #[test]
    fn unterminated_header_reads_as_no_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "tenure,sta").unwrap();
        let log = PredictionLog::new(&path, &schema());
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn invalid_prediction_is_reported_with_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "tenure,state_code,prediction\n5,OH,1\n6,KS,7\n").unwrap();
        let log = PredictionLog::new(&path, &schema());
        assert!(matches!(log.read_all(), Err(LogError::InvalidRow { row: 2, .. })));
    }

    #[test]
    fn summary_counts_outcomes() {
        let entries = [
            entry(1, "KS", ChurnLabel::Churn),
            entry(2, "KS", ChurnLabel::NotChurn),
            entry(3, "OH", ChurnLabel::Churn),
        ];
        let summary = PredictionSummary::from_entries(&entries);
        assert_eq!(summary, PredictionSummary { not_churn: 1, churn: 2 });
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.occurrences(), [("not churn", 1), ("churn", 2)]);
        assert_eq!(summary.to_string(), "not churn: 1, churn: 2");
    }
}
