use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::models::*;

const RECORDING_COLUMNS: &str =
    "id, user_id, reference_id, duration, sample_rate, channels, created_at, storage_path, scores";

const ANALYSIS_COLUMNS: &str = "id, recording_id, reference_id, pitch_accuracy, rhythm_accuracy, \
     timing_offset, confidence, detailed_scores_json, analyzed_at";

fn recording_from_row(r: &Row) -> RecordingRow {
    RecordingRow {
        id: r.get(0),
        user_id: r.get(1),
        reference_id: r.get(2),
        duration: r.get(3),
        sample_rate: r.get(4),
        channels: r.get(5),
        created_at: r.get(6),
        storage_path: r.get(7),
        scores: r.get(8),
    }
}

fn analysis_from_row(r: &Row) -> AnalysisRow {
    AnalysisRow {
        id: r.get(0),
        recording_id: r.get(1),
        reference_id: r.get(2),
        pitch_accuracy: r.get(3),
        rhythm_accuracy: r.get(4),
        timing_offset: r.get(5),
        confidence: r.get(6),
        detailed_scores: r.get(7),
        analyzed_at: r.get(8),
    }
}

/// Insert a new recording row
pub async fn insert_recording(pool: &Pool, recording: &NewRecording) -> Result<()> {
    let client = pool.get().await?;

    client
        .execute(
            "INSERT INTO recordings
             (id, user_id, reference_id, duration, sample_rate, channels, created_at, storage_path)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &recording.id,
                &recording.user_id,
                &recording.reference_id,
                &recording.duration,
                &recording.sample_rate,
                &recording.channels,
                &recording.created_at,
                &recording.storage_path,
            ],
        )
        .await
        .context("Failed to insert recording")?;

    Ok(())
}

/// Get a recording by ID
pub async fn get_recording(pool: &Pool, id: &str) -> Result<Option<RecordingRow>> {
    let client = pool.get().await?;

    let row = client
        .query_opt(
            &format!("SELECT {} FROM recordings WHERE id = $1", RECORDING_COLUMNS),
            &[&id],
        )
        .await
        .context("Failed to get recording")?;

    Ok(row.as_ref().map(recording_from_row))
}

/// Most recent recordings of a user
pub async fn list_recordings_by_user(
    pool: &Pool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<RecordingRow>> {
    let client = pool.get().await?;

    let rows = client
        .query(
            &format!(
                "SELECT {} FROM recordings
                 WHERE user_id = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2",
                RECORDING_COLUMNS
            ),
            &[&user_id, &limit],
        )
        .await
        .context("Failed to list recordings")?;

    Ok(rows.iter().map(recording_from_row).collect())
}

/// Replace the attached score summary; returns false if the recording is unknown
pub async fn update_scores(pool: &Pool, id: &str, scores: &serde_json::Value) -> Result<bool> {
    let client = pool.get().await?;

    let updated = client
        .execute(
            "UPDATE recordings SET scores = $2 WHERE id = $1",
            &[&id, scores],
        )
        .await
        .context("Failed to update recording scores")?;

    Ok(updated > 0)
}

/// Append an analysis result
pub async fn insert_analysis(pool: &Pool, analysis: &NewAnalysis) -> Result<i64> {
    let client = pool.get().await?;

    let row = client
        .query_one(
            "INSERT INTO analysis_results
             (recording_id, reference_id, pitch_accuracy, rhythm_accuracy,
              timing_offset, confidence, detailed_scores_json, analyzed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id",
            &[
                &analysis.recording_id,
                &analysis.reference_id,
                &analysis.pitch_accuracy,
                &analysis.rhythm_accuracy,
                &analysis.timing_offset,
                &analysis.confidence,
                &analysis.detailed_scores,
                &analysis.analyzed_at,
            ],
        )
        .await
        .context("Failed to insert analysis result")?;

    Ok(row.get(0))
}

/// All analyses of a recording, optionally restricted to one reference, oldest first
pub async fn list_analyses(
    pool: &Pool,
    recording_id: &str,
    reference_id: Option<&str>,
) -> Result<Vec<AnalysisRow>> {
    let client = pool.get().await?;

    let rows = match reference_id {
        Some(reference_id) => {
            client
                .query(
                    &format!(
                        "SELECT {} FROM analysis_results
                         WHERE recording_id = $1 AND reference_id = $2
                         ORDER BY id",
                        ANALYSIS_COLUMNS
                    ),
                    &[&recording_id, &reference_id],
                )
                .await
        }
        None => {
            client
                .query(
                    &format!(
                        "SELECT {} FROM analysis_results WHERE recording_id = $1 ORDER BY id",
                        ANALYSIS_COLUMNS
                    ),
                    &[&recording_id],
                )
                .await
        }
    }
    .context("Failed to list analysis results")?;

    Ok(rows.iter().map(analysis_from_row).collect())
}

#[cfg(test)]
mod tests {
    // These tests require a running PostgreSQL instance:
    // cargo test --package piyyut-db -- --ignored
    use super::*;
    use crate::connection::{create_pool, initialize_schema};
    use chrono::Utc;

    #[tokio::test]
    #[ignore]
    async fn test_insert_and_list_recordings() {
        let pool = create_pool("localhost", 5432, "piyyut", "piyyut_user", "piyyut_pass", 4)
            .unwrap();
        initialize_schema(&pool).await.unwrap();

        let id = format!("rec_pg_{}", Utc::now().timestamp_micros());
        let new = NewRecording {
            id: id.clone(),
            user_id: "pg-user".to_string(),
            reference_id: "lecha-dodi".to_string(),
            duration: 1.5,
            sample_rate: 44100,
            channels: 1,
            created_at: Utc::now(),
            storage_path: format!("/tmp/{}.wav", id),
        };
        insert_recording(&pool, &new).await.unwrap();

        let loaded = get_recording(&pool, &id).await.unwrap().unwrap();
        assert_eq!(loaded.reference_id, "lecha-dodi");

        let listed = list_recordings_by_user(&pool, "pg-user", 5).await.unwrap();
        assert_eq!(listed[0].id, id);
    }
}
