//! Storage backend trait and implementations
//!
//! Metadata rows live in a relational database: SQLite for a single machine,
//! PostgreSQL for a shared server. Audio blobs are handled by the store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use piyyut_db::{AnalysisRow, NewAnalysis, NewRecording, RecordingRow};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::storage_config::PostgresqlConfig;

/// Abstract storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert a recording row; fails if the id exists
    async fn insert_recording(&self, recording: &NewRecording) -> Result<()>;

    async fn get_recording(&self, id: &str) -> Result<Option<RecordingRow>>;

    /// Most recent first
    async fn list_recordings_by_user(&self, user_id: &str, limit: usize)
        -> Result<Vec<RecordingRow>>;

    /// Returns false if the recording is unknown
    async fn update_scores(&self, id: &str, scores: &serde_json::Value) -> Result<bool>;

    /// Append an analysis row and return its id
    async fn insert_analysis(&self, analysis: &NewAnalysis) -> Result<i64>;

    /// Oldest first
    async fn list_analyses(
        &self,
        recording_id: &str,
        reference_id: Option<&str>,
    ) -> Result<Vec<AnalysisRow>>;
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// SQLite-backed storage
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self> {
        let conn = piyyut_db::open_sqlite(path)?;
        log::debug!("Opened SQLite database {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Arc::new(Mutex::new(piyyut_db::open_sqlite_in_memory()?)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("SQLite connection lock poisoned"))
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn insert_recording(&self, recording: &NewRecording) -> Result<()> {
        piyyut_db::sqlite::insert_recording(&*self.conn()?, recording)
    }

    async fn get_recording(&self, id: &str) -> Result<Option<RecordingRow>> {
        piyyut_db::sqlite::get_recording(&*self.conn()?, id)
    }

    async fn list_recordings_by_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RecordingRow>> {
        piyyut_db::sqlite::list_recordings_by_user(&*self.conn()?, user_id, limit_param(limit))
    }

    async fn update_scores(&self, id: &str, scores: &serde_json::Value) -> Result<bool> {
        piyyut_db::sqlite::update_scores(&*self.conn()?, id, scores)
    }

    async fn insert_analysis(&self, analysis: &NewAnalysis) -> Result<i64> {
        piyyut_db::sqlite::insert_analysis(&*self.conn()?, analysis)
    }

    async fn list_analyses(
        &self,
        recording_id: &str,
        reference_id: Option<&str>,
    ) -> Result<Vec<AnalysisRow>> {
        piyyut_db::sqlite::list_analyses(&*self.conn()?, recording_id, reference_id)
    }
}

/// PostgreSQL storage backend
pub struct PostgresqlBackend {
    pool: deadpool_postgres::Pool,
}

impl PostgresqlBackend {
    /// Create a new PostgreSQL backend and make sure the schema exists
    pub async fn new(config: &PostgresqlConfig) -> Result<Self> {
        let pool = piyyut_db::create_pool(
            &config.host,
            config.port,
            &config.database,
            &config.user,
            &config.password,
            config.max_connections,
        )?;

        piyyut_db::test_connection(&pool)
            .await
            .with_context(|| format!("Cannot reach PostgreSQL at {}:{}", config.host, config.port))?;
        piyyut_db::initialize_schema(&pool).await?;

        log::info!(
            "Connected to PostgreSQL {}:{}/{}",
            config.host,
            config.port,
            config.database
        );
        Ok(Self { pool })
    }
}

#[async_trait]
impl StorageBackend for PostgresqlBackend {
    async fn insert_recording(&self, recording: &NewRecording) -> Result<()> {
        piyyut_db::insert_recording(&self.pool, recording).await
    }

    async fn get_recording(&self, id: &str) -> Result<Option<RecordingRow>> {
        piyyut_db::get_recording(&self.pool, id).await
    }

    async fn list_recordings_by_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RecordingRow>> {
        piyyut_db::list_recordings_by_user(&self.pool, user_id, limit_param(limit)).await
    }

    async fn update_scores(&self, id: &str, scores: &serde_json::Value) -> Result<bool> {
        piyyut_db::update_scores(&self.pool, id, scores).await
    }

    async fn insert_analysis(&self, analysis: &NewAnalysis) -> Result<i64> {
        piyyut_db::insert_analysis(&self.pool, analysis).await
    }

    async fn list_analyses(
        &self,
        recording_id: &str,
        reference_id: Option<&str>,
    ) -> Result<Vec<AnalysisRow>> {
        piyyut_db::list_analyses(&self.pool, recording_id, reference_id).await
    }
}
