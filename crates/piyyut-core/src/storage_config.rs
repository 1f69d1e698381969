//! Configuration file for the practice engine
//!
//! Provides TOML-based configuration for selecting the metadata backend
//! (SQLite vs PostgreSQL), the recordings directory, analysis parameters and
//! capture buffering. Every field has a default, so an empty file is valid.

use crate::audio::CaptureConfig;
use crate::config::AnalysisConfig;
use crate::error::RecordingError;
use crate::storage_backend::{PostgresqlBackend, SqliteBackend, StorageBackend};
use crate::store::RecordingStore;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PiyyutConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Directory holding the WAV blobs
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub postgresql: PostgresqlConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            recordings_dir: default_recordings_dir(),
            sqlite: SqliteConfig::default(),
            postgresql: PostgresqlConfig::default(),
        }
    }
}

fn default_recordings_dir() -> PathBuf {
    PathBuf::from("./recordings")
}

/// Storage backend type
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Postgresql,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SqliteConfig {
    /// Database file; defaults to `recordings.db` inside the recordings directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// PostgreSQL backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresqlConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for PostgresqlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_database() -> String {
    "piyyut".to_string()
}
fn default_user() -> String {
    "piyyut_user".to_string()
}
fn default_password() -> String {
    "piyyut_pass".to_string()
}
fn default_max_connections() -> u32 {
    10
}

impl PiyyutConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: PiyyutConfig =
            toml::from_str(&content).context("Failed to parse TOML config")?;
        config.analysis.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Self::load(path).map_err(|e| RecordingError::Config(format!("{:#}", e))),
            None => Ok(Self::default()),
        }
    }

    /// Get PostgreSQL connection string
    pub fn connection_string(&self) -> Option<String> {
        match self.storage.backend {
            BackendKind::Postgresql => {
                let pg = &self.storage.postgresql;
                Some(format!(
                    "postgresql://{}:{}@{}:{}/{}",
                    pg.user, pg.password, pg.host, pg.port, pg.database
                ))
            }
            BackendKind::Sqlite => None,
        }
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.storage
            .sqlite
            .path
            .clone()
            .unwrap_or_else(|| self.storage.recordings_dir.join("recordings.db"))
    }

    /// Build the configured backend
    pub async fn open_backend(&self) -> crate::Result<Arc<dyn StorageBackend>> {
        let backend: Arc<dyn StorageBackend> = match self.storage.backend {
            BackendKind::Sqlite => {
                Arc::new(SqliteBackend::open(&self.sqlite_path()).map_err(RecordingError::storage)?)
            }
            BackendKind::Postgresql => Arc::new(
                PostgresqlBackend::new(&self.storage.postgresql)
                    .await
                    .map_err(RecordingError::storage)?,
            ),
        };
        Ok(backend)
    }

    /// Open the recording store described by this configuration
    pub async fn open_store(&self) -> crate::Result<RecordingStore> {
        let backend = self.open_backend().await?;
        RecordingStore::new(&self.storage.recordings_dir, backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: PiyyutConfig = toml::from_str("").unwrap();
        assert_eq!(config.storage.backend, BackendKind::Sqlite);
        assert_eq!(config.storage.recordings_dir, PathBuf::from("./recordings"));
        assert_eq!(config.sqlite_path(), PathBuf::from("./recordings/recordings.db"));
        assert_eq!(config.analysis, AnalysisConfig::default());
        assert_eq!(config.capture.queue_capacity, 65536);
        assert!(config.connection_string().is_none());
    }

    #[test]
    fn test_parse_postgresql_toml() {
        let toml_str = r#"
            [storage]
            backend = "postgresql"
            recordings_dir = "/srv/piyyut/audio"

            [storage.postgresql]
            host = "db.example.com"
            port = 5433
            database = "practice"
            user = "cantor"
            password = "secret"
            max_connections = 20
        "#;

        let config: PiyyutConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.backend, BackendKind::Postgresql);
        assert_eq!(config.storage.postgresql.port, 5433);
        let conn_str = config.connection_string().unwrap();
        assert!(conn_str.contains("cantor"));
        assert!(conn_str.contains("db.example.com:5433/practice"));
    }

    #[test]
    fn test_parse_analysis_overrides() {
        let toml_str = r#"
            [analysis]
            pitch_stability_threshold = 0.5
            pitch_diff_unit = "hertz"
            max_rhythm_deviation = 8.0

            [capture]
            queue_capacity = 128
        "#;

        let config: PiyyutConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.analysis.pitch_stability_threshold, 0.5);
        assert_eq!(config.analysis.pitch_diff_unit, crate::config::PitchDiffUnit::Hertz);
        assert_eq!(config.analysis.hop_size, 512);
        assert_eq!(config.capture.queue_capacity, 128);
        assert_eq!(config.capture.chunk_frames, 1024);
    }

    #[test]
    fn test_load_rejects_invalid_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("piyyut.toml");
        std::fs::write(&path, "[analysis]\nhop_size = 0\n").unwrap();
        assert!(PiyyutConfig::load(&path).is_err());
        assert!(matches!(
            PiyyutConfig::load_or_default(Some(&path)),
            Err(RecordingError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PiyyutConfig::default();
        config.storage.recordings_dir = dir.path().join("audio");

        let store = config.open_store().await.unwrap();
        assert!(store.list_by_user("nobody", 10).await.unwrap().is_empty());
        assert!(dir.path().join("audio").join("recordings.db").exists());
    }
}
