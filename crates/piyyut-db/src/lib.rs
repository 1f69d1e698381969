//! Piyyut Database Layer
//!
//! Relational storage for recording metadata and comparison results,
//! with a SQLite flavour for local use and a PostgreSQL flavour for servers.

pub mod connection;
pub mod models;
pub mod operations;
pub mod schema;
pub mod sqlite;

// Re-export commonly used types
pub use connection::{
    create_pool, initialize_schema, open_sqlite, open_sqlite_in_memory, test_connection, DbPool,
};
pub use models::{AnalysisRow, NewAnalysis, NewRecording, RecordingRow};
pub use operations::{
    get_recording, insert_analysis, insert_recording, list_analyses, list_recordings_by_user,
    update_scores,
};
