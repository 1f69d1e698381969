//! SQLite operations mirroring the PostgreSQL ones in `operations`

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::*;

const RECORDING_COLUMNS: &str =
    "id, user_id, reference_id, duration, sample_rate, channels, created_at, storage_path, scores";

const ANALYSIS_COLUMNS: &str = "id, recording_id, reference_id, pitch_accuracy, rhythm_accuracy, \
     timing_offset, confidence, detailed_scores_json, analyzed_at";

/// Fixed-width UTC timestamps so that text ordering equals time ordering
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn decode_json(idx: usize, text: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn recording_from_row(r: &Row<'_>) -> rusqlite::Result<RecordingRow> {
    let created_at: String = r.get(6)?;
    let scores: Option<String> = r.get(8)?;
    Ok(RecordingRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        reference_id: r.get(2)?,
        duration: r.get(3)?,
        sample_rate: r.get(4)?,
        channels: r.get(5)?,
        created_at: decode_timestamp(6, &created_at)?,
        storage_path: r.get(7)?,
        scores: scores.map(|s| decode_json(8, &s)).transpose()?,
    })
}

fn analysis_from_row(r: &Row<'_>) -> rusqlite::Result<AnalysisRow> {
    let detailed: String = r.get(7)?;
    let analyzed_at: String = r.get(8)?;
    Ok(AnalysisRow {
        id: r.get(0)?,
        recording_id: r.get(1)?,
        reference_id: r.get(2)?,
        pitch_accuracy: r.get(3)?,
        rhythm_accuracy: r.get(4)?,
        timing_offset: r.get(5)?,
        confidence: r.get(6)?,
        detailed_scores: decode_json(7, &detailed)?,
        analyzed_at: decode_timestamp(8, &analyzed_at)?,
    })
}

/// Insert a new recording row
pub fn insert_recording(conn: &Connection, recording: &NewRecording) -> Result<()> {
    conn.execute(
        "INSERT INTO recordings
         (id, user_id, reference_id, duration, sample_rate, channels, created_at, storage_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            recording.id,
            recording.user_id,
            recording.reference_id,
            recording.duration,
            recording.sample_rate,
            recording.channels,
            encode_timestamp(&recording.created_at),
            recording.storage_path,
        ],
    )
    .context("Failed to insert recording")?;
    Ok(())
}

/// Get a recording by ID
pub fn get_recording(conn: &Connection, id: &str) -> Result<Option<RecordingRow>> {
    conn.query_row(
        &format!("SELECT {} FROM recordings WHERE id = ?1", RECORDING_COLUMNS),
        params![id],
        recording_from_row,
    )
    .optional()
    .context("Failed to get recording")
}

/// Most recent recordings of a user
pub fn list_recordings_by_user(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> Result<Vec<RecordingRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM recordings
         WHERE user_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
        RECORDING_COLUMNS
    ))?;

    let rows = stmt
        .query_map(params![user_id, limit], recording_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to list recordings")?;

    Ok(rows)
}

/// Replace the attached score summary; returns false if the recording is unknown
pub fn update_scores(conn: &Connection, id: &str, scores: &serde_json::Value) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE recordings SET scores = ?2 WHERE id = ?1",
            params![id, scores.to_string()],
        )
        .context("Failed to update recording scores")?;
    Ok(updated > 0)
}

/// Append an analysis result
pub fn insert_analysis(conn: &Connection, analysis: &NewAnalysis) -> Result<i64> {
    conn.execute(
        "INSERT INTO analysis_results
         (recording_id, reference_id, pitch_accuracy, rhythm_accuracy,
          timing_offset, confidence, detailed_scores_json, analyzed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            analysis.recording_id,
            analysis.reference_id,
            analysis.pitch_accuracy,
            analysis.rhythm_accuracy,
            analysis.timing_offset,
            analysis.confidence,
            analysis.detailed_scores.to_string(),
            encode_timestamp(&analysis.analyzed_at),
        ],
    )
    .context("Failed to insert analysis result")?;
    Ok(conn.last_insert_rowid())
}

/// All analyses of a recording, optionally restricted to one reference, oldest first
pub fn list_analyses(
    conn: &Connection,
    recording_id: &str,
    reference_id: Option<&str>,
) -> Result<Vec<AnalysisRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM analysis_results
         WHERE recording_id = ?1 AND (?2 IS NULL OR reference_id = ?2)
         ORDER BY id",
        ANALYSIS_COLUMNS
    ))?;

    let rows = stmt
        .query_map(params![recording_id, reference_id], analysis_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to list analysis results")?;

    Ok(rows)
}
