//! Database connection management

use anyhow::Context;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use rusqlite::Connection;
use std::path::Path;
use tokio_postgres::NoTls;

use crate::schema::{POSTGRES_SCHEMA, SQLITE_SCHEMA};

pub type DbPool = Pool;

/// Create a PostgreSQL connection pool
pub fn create_pool(
    host: &str,
    port: u16,
    database: &str,
    user: &str,
    password: &str,
    max_connections: u32,
) -> anyhow::Result<DbPool> {
    let mut cfg = Config::new();
    cfg.host = Some(host.to_string());
    cfg.port = Some(port);
    cfg.dbname = Some(database.to_string());
    cfg.user = Some(user.to_string());
    cfg.password = Some(password.to_string());
    cfg.pool = Some(PoolConfig::new(max_connections.max(1) as usize));

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

    Ok(pool)
}

/// Test database connection
pub async fn test_connection(pool: &DbPool) -> anyhow::Result<()> {
    let client = pool.get().await?;
    let row = client.query_one("SELECT 1 as test", &[]).await?;
    let test: i32 = row.get(0);

    if test == 1 {
        Ok(())
    } else {
        anyhow::bail!("Database connection test failed")
    }
}

/// Create the recordings and analysis tables if they are missing
pub async fn initialize_schema(pool: &DbPool) -> anyhow::Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(POSTGRES_SCHEMA)
        .await
        .context("Failed to create PostgreSQL schema")?;
    Ok(())
}

/// Open (or create) a SQLite database file and make sure the schema exists
pub fn open_sqlite(path: &Path) -> anyhow::Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }

    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("Failed to set WAL mode")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SQLITE_SCHEMA)
        .context("Failed to create SQLite schema")?;

    log::debug!("Opened SQLite database at {}", path.display());
    Ok(conn)
}

/// In-memory SQLite database with the schema applied
pub fn open_sqlite_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SQLITE_SCHEMA)
        .context("Failed to create SQLite schema")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_sqlite_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_sqlite(&dir.path().join("nested").join("recordings.db")).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' \
                 AND name IN ('recordings', 'analysis_results')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_schema_is_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recordings.db");
        drop(open_sqlite(&path).unwrap());
        assert!(open_sqlite(&path).is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL to be running
    async fn test_create_pool() {
        let pool = create_pool(
            "localhost",
            5432,
            "piyyut",
            "piyyut_user",
            "piyyut_pass",
            10,
        )
        .unwrap();
        assert!(test_connection(&pool).await.is_ok());
        assert!(initialize_schema(&pool).await.is_ok());
    }
}
