//! Table definitions for both relational backends
//!
//! Timestamps are RFC 3339 text in SQLite and `TIMESTAMPTZ` in PostgreSQL.

pub const SQLITE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS recordings (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    reference_id TEXT NOT NULL,
    duration REAL NOT NULL,
    sample_rate INTEGER NOT NULL,
    channels INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    scores TEXT
);

CREATE INDEX IF NOT EXISTS idx_recordings_user_created
    ON recordings (user_id, created_at);

CREATE TABLE IF NOT EXISTS analysis_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recording_id TEXT NOT NULL REFERENCES recordings(id),
    reference_id TEXT NOT NULL,
    pitch_accuracy REAL NOT NULL,
    rhythm_accuracy REAL NOT NULL,
    timing_offset REAL NOT NULL,
    confidence REAL NOT NULL,
    detailed_scores_json TEXT NOT NULL,
    analyzed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analysis_pair
    ON analysis_results (recording_id, reference_id);
";

pub const POSTGRES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS recordings (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    reference_id TEXT NOT NULL,
    duration DOUBLE PRECISION NOT NULL,
    sample_rate INTEGER NOT NULL,
    channels SMALLINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    storage_path TEXT NOT NULL,
    scores JSONB
);

CREATE INDEX IF NOT EXISTS idx_recordings_user_created
    ON recordings (user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS analysis_results (
    id BIGSERIAL PRIMARY KEY,
    recording_id TEXT NOT NULL REFERENCES recordings(id),
    reference_id TEXT NOT NULL,
    pitch_accuracy DOUBLE PRECISION NOT NULL,
    rhythm_accuracy DOUBLE PRECISION NOT NULL,
    timing_offset DOUBLE PRECISION NOT NULL,
    confidence DOUBLE PRECISION NOT NULL,
    detailed_scores_json JSONB NOT NULL,
    analyzed_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analysis_pair
    ON analysis_results (recording_id, reference_id);
";
