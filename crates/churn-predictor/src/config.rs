//! Runtime configuration.
//!
//! Values are resolved in three layers: built-in defaults, then an optional
//! TOML file, then `CHURN_*` environment variables.
//!
//! ```toml
//! [artifacts]
//! schema = "app/schema.json"
//! encoder = "models/encoder.json"
//! model = "models/xg.json"
//!
//! [history]
//! path = "historical_data.csv"
//!
//! [engineered]
//! source = "total_eve_minutes"
//! output = "total_eve_minutes"
//! baseline = 200.29
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::pipeline::ArtifactPaths;
use crate::transform::MeanOffset;

pub const ENV_CONFIG: &str = "CHURN_CONFIG";
pub const ENV_SCHEMA_PATH: &str = "CHURN_SCHEMA_PATH";
pub const ENV_ENCODER_PATH: &str = "CHURN_ENCODER_PATH";
pub const ENV_MODEL_PATH: &str = "CHURN_MODEL_PATH";
pub const ENV_HISTORY_PATH: &str = "CHURN_HISTORY_PATH";
pub const ENV_EVE_BASELINE: &str = "CHURN_EVE_BASELINE";

const DEFAULT_SCHEMA_PATH: &str = "app/schema.json";
const DEFAULT_ENCODER_PATH: &str = "models/encoder.json";
const DEFAULT_MODEL_PATH: &str = "models/xg.json";
const DEFAULT_HISTORY_PATH: &str = "historical_data.csv";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed reading config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing TOML config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{name}={value:?} is not a valid number")]
    InvalidNumber { name: &'static str, value: String },
}

/// Resolved settings for one process.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub artifacts: ArtifactPaths,
    pub history_path: PathBuf,
    pub engineered: MeanOffset,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            artifacts: ArtifactPaths {
                schema: PathBuf::from(DEFAULT_SCHEMA_PATH),
                encoder: PathBuf::from(DEFAULT_ENCODER_PATH),
                model: PathBuf::from(DEFAULT_MODEL_PATH),
            },
            history_path: PathBuf::from(DEFAULT_HISTORY_PATH),
            engineered: MeanOffset::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    artifacts: Option<FileArtifacts>,
    #[serde(default)]
    history: Option<FileHistory>,
    #[serde(default)]
    engineered: Option<MeanOffset>,
}

#[derive(Debug, Default, Deserialize)]
struct FileArtifacts {
    schema: Option<PathBuf>,
    encoder: Option<PathBuf>,
    model: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileHistory {
    path: Option<PathBuf>,
}

impl AppConfig {
    /// Defaults, then `path` (or `$CHURN_CONFIG`), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// [`AppConfig::load`] with an explicit environment lookup.
    pub fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| non_empty(env(ENV_CONFIG)).map(PathBuf::from));
        if let Some(file) = file {
            cfg.apply_file(&file)?;
        }
        cfg.apply_env_overrides_from(env)?;
        Ok(cfg)
    }

    /// Overlay settings from a TOML file. Missing keys keep their value.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(artifacts) = file.artifacts {
            if let Some(v) = artifacts.schema {
                self.artifacts.schema = v;
            }
            if let Some(v) = artifacts.encoder {
                self.artifacts.encoder = v;
            }
            if let Some(v) = artifacts.model {
                self.artifacts.model = v;
            }
        }
        if let Some(v) = file.history.and_then(|h| h.path) {
            self.history_path = v;
        }
        if let Some(v) = file.engineered {
            self.engineered = v;
        }
        tracing::debug!(path = %path.display(), "applied config file");
        Ok(())
    }

    /// Overlay `CHURN_*` variables read through `env`. Empty values are ignored.
    pub fn apply_env_overrides_from(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |name: &str| non_empty(env(name));

        if let Some(v) = var(ENV_SCHEMA_PATH) {
            self.artifacts.schema = v.into();
        }
        if let Some(v) = var(ENV_ENCODER_PATH) {
            self.artifacts.encoder = v.into();
        }
        if let Some(v) = var(ENV_MODEL_PATH) {
            self.artifacts.model = v.into();
        }
        if let Some(v) = var(ENV_HISTORY_PATH) {
            self.history_path = v.into();
        }
        if let Some(v) = var(ENV_EVE_BASELINE) {
            self.engineered.baseline = v
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|b| b.is_finite())
                .ok_or(ConfigError::InvalidNumber {
                    name: ENV_EVE_BASELINE,
                    value: v,
                })?;
        }
        Ok(())
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::transform::MEAN_EVE_MINUTES;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = AppConfig::load_with(None, env(&[])).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.engineered.baseline, MEAN_EVE_MINUTES);
        assert_eq!(cfg.history_path, PathBuf::from("historical_data.csv"));
    }

    #[test]
    fn file_overrides_defaults_and_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("churn.toml");
        std::fs::write(
            &path,
            r#"
[artifacts]
model = "/srv/models/xg.json"

[history]
path = "/var/lib/churn/history.csv"

[engineered]
baseline = 199.5
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_with(
            Some(&path),
            env(&[(ENV_HISTORY_PATH, "/tmp/h.csv"), (ENV_SCHEMA_PATH, "  ")]),
        )
        .unwrap();
        assert_eq!(cfg.artifacts.model, PathBuf::from("/srv/models/xg.json"));
        assert_eq!(cfg.artifacts.schema, PathBuf::from(DEFAULT_SCHEMA_PATH));
        assert_eq!(cfg.history_path, PathBuf::from("/tmp/h.csv"));
        assert_eq!(cfg.engineered.baseline, 199.5);
        assert_eq!(cfg.engineered.source, "total_eve_minutes");
    }

    #[test]
    fn config_path_can_come_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("churn.toml");
        std::fs::write(&path, "[artifacts]\nencoder = \"enc.json\"\n").unwrap();
        let path_str = path.display().to_string();

        let cfg = AppConfig::load_with(None, env(&[(ENV_CONFIG, path_str.as_str())])).unwrap();
        assert_eq!(cfg.artifacts.encoder, PathBuf::from("enc.json"));
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(matches!(
            AppConfig::load_with(None, env(&[(ENV_EVE_BASELINE, "lots")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            AppConfig::load_with(Some(Path::new("/no/such/churn.toml")), env(&[])),
            Err(ConfigError::Io { .. })
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("churn.toml");
        std::fs::write(&path, "[unknown]\nkey = 1\n").unwrap();
        assert!(matches!(
            AppConfig::load_with(Some(&path), env(&[])),
            Err(ConfigError::Parse { .. })
        ));
    }
}
