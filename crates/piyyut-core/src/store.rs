//! Recording store: WAV blobs on disk plus metadata rows in a backend
//!
//! A blob is written to `<id>.wav.partial` and renamed into place before its
//! metadata row is inserted, so a row never points at a half-written file.
//! If the insert fails the blob is removed again.

use crate::audio::{load_waveform, read_audio, write_wav, Waveform, CANONICAL_SAMPLE_RATE};
use crate::error::RecordingError;
use crate::scoring::{AnalysisResult, DetailedScores};
use crate::storage_backend::StorageBackend;
use chrono::{DateTime, Utc};
use piyyut_db::{AnalysisRow, NewAnalysis, NewRecording, RecordingRow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Who recorded what; the id is generated unless given
#[derive(Debug, Clone, Default)]
pub struct RecordingRequest {
    pub user_id: String,
    pub reference_track_id: String,
    pub id: Option<String>,
}

impl RecordingRequest {
    pub fn new(user_id: impl Into<String>, reference_track_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            reference_track_id: reference_track_id.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A persisted recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub user_id: String,
    pub reference_track_id: String,
    /// Seconds
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub created_at: DateTime<Utc>,
    pub storage_path: PathBuf,
    /// Latest attached score summary
    pub scores: Option<serde_json::Value>,
}

/// A persisted comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub id: i64,
    pub recording_id: String,
    pub reference_id: String,
    pub analyzed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: AnalysisResult,
}

impl TryFrom<AnalysisRow> for StoredAnalysis {
    type Error = serde_json::Error;

    fn try_from(row: AnalysisRow) -> Result<Self, Self::Error> {
        let detailed_scores: DetailedScores = serde_json::from_value(row.detailed_scores)?;
        Ok(Self {
            id: row.id,
            recording_id: row.recording_id,
            reference_id: row.reference_id,
            analyzed_at: row.analyzed_at,
            result: AnalysisResult {
                pitch_accuracy: row.pitch_accuracy,
                rhythm_accuracy: row.rhythm_accuracy,
                timing_offset: row.timing_offset,
                confidence: row.confidence,
                detailed_scores,
            },
        })
    }
}

/// `rec_<YYYYmmdd_HHMMSS>_<8 hex chars>`
pub fn generate_recording_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("rec_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Removes an id from the in-flight set when dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.id);
        }
    }
}

/// Write `<id>.wav.partial` and rename it into place
fn stage_blob(waveform: &Waveform, partial_path: &Path, final_path: &Path) -> crate::Result<()> {
    if final_path.exists() {
        return Err(RecordingError::Storage(format!(
            "blob {} already exists",
            final_path.display()
        )));
    }
    if let Err(e) = write_wav(partial_path, waveform) {
        let _ = std::fs::remove_file(partial_path);
        return Err(RecordingError::Storage(format!("{:#}", e)));
    }
    std::fs::rename(partial_path, final_path).map_err(|e| {
        let _ = std::fs::remove_file(partial_path);
        RecordingError::Storage(format!("cannot move blob into place: {}", e))
    })
}

pub struct RecordingStore {
    audio_dir: PathBuf,
    backend: Arc<dyn StorageBackend>,
    in_flight: Mutex<HashSet<String>>,
}

impl RecordingStore {
    pub fn new(audio_dir: &Path, backend: Arc<dyn StorageBackend>) -> crate::Result<Self> {
        std::fs::create_dir_all(audio_dir).map_err(|e| {
            RecordingError::Storage(format!(
                "cannot create recordings directory {}: {}",
                audio_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            audio_dir: audio_dir.to_path_buf(),
            backend,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    fn claim(&self, id: &str) -> crate::Result<InFlight<'_>> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| RecordingError::Storage("in-flight set lock poisoned".to_string()))?;
        if !set.insert(id.to_string()) {
            return Err(RecordingError::Storage(format!(
                "a save for {} is already in progress",
                id
            )));
        }
        Ok(InFlight {
            set: &self.in_flight,
            id: id.to_string(),
        })
    }

    fn metadata_from_row(&self, row: RecordingRow) -> RecordingMetadata {
        RecordingMetadata {
            storage_path: self.audio_dir.join(&row.storage_path),
            id: row.id,
            user_id: row.user_id,
            reference_track_id: row.reference_id,
            duration: row.duration,
            sample_rate: row.sample_rate.max(0) as u32,
            channels: row.channels.max(0) as u16,
            created_at: row.created_at,
            scores: row.scores,
        }
    }

    /// Persist a waveform and its metadata; returns the recording id
    pub async fn save(&self, request: RecordingRequest, waveform: &Waveform) -> crate::Result<String> {
        if waveform.is_empty() || waveform.sample_rate == 0 {
            return Err(RecordingError::Storage(
                "refusing to store an empty waveform".to_string(),
            ));
        }

        let created_at = Utc::now();
        let id = request
            .id
            .clone()
            .unwrap_or_else(|| generate_recording_id(created_at));
        let _claim = self.claim(&id)?;

        let file_name = format!("{}.wav", id);
        let final_path = self.audio_dir.join(&file_name);
        let partial_path = self.audio_dir.join(format!("{}.partial", file_name));

        if self
            .backend
            .get_recording(&id)
            .await
            .map_err(RecordingError::storage)?
            .is_some()
        {
            return Err(RecordingError::Storage(format!("recording {} already exists", id)));
        }

        let blob = waveform.clone();
        let staged_path = final_path.clone();
        tokio::task::spawn_blocking(move || stage_blob(&blob, &partial_path, &staged_path))
            .await
            .map_err(|e| RecordingError::Storage(format!("blob write task failed: {}", e)))??;

        let row = NewRecording {
            id: id.clone(),
            user_id: request.user_id,
            reference_id: request.reference_track_id,
            duration: waveform.duration_secs(),
            sample_rate: waveform.sample_rate as i32,
            channels: waveform.channels as i16,
            created_at,
            storage_path: file_name,
        };

        if let Err(e) = self.backend.insert_recording(&row).await {
            log::warn!("Metadata insert for {} failed, removing blob: {:#}", id, e);
            if let Err(rm) = tokio::fs::remove_file(&final_path).await {
                log::warn!("Could not remove orphan blob {}: {}", final_path.display(), rm);
            }
            return Err(RecordingError::storage(e));
        }

        log::info!(
            "Saved recording {} ({:.2}s) for user {}",
            id,
            row.duration,
            row.user_id
        );
        Ok(id)
    }

    pub async fn load(&self, id: &str) -> crate::Result<RecordingMetadata> {
        let row = self
            .backend
            .get_recording(id)
            .await
            .map_err(RecordingError::storage)?
            .ok_or_else(|| RecordingError::NotFound(format!("recording {}", id)))?;
        Ok(self.metadata_from_row(row))
    }

    /// The stored samples, exactly as saved
    pub fn load_waveform(&self, metadata: &RecordingMetadata) -> crate::Result<Waveform> {
        read_audio(&metadata.storage_path).map_err(RecordingError::io)
    }

    pub async fn list_by_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> crate::Result<Vec<RecordingMetadata>> {
        let rows = self
            .backend
            .list_recordings_by_user(user_id, limit)
            .await
            .map_err(RecordingError::storage)?;
        Ok(rows.into_iter().map(|r| self.metadata_from_row(r)).collect())
    }

    /// Append a comparison result; earlier results are kept
    pub async fn save_analysis(
        &self,
        recording_id: &str,
        reference_id: &str,
        result: &AnalysisResult,
    ) -> crate::Result<i64> {
        self.load(recording_id).await?;

        let detailed_scores = serde_json::to_value(&result.detailed_scores)
            .map_err(|e| RecordingError::Storage(e.to_string()))?;
        let row = NewAnalysis {
            recording_id: recording_id.to_string(),
            reference_id: reference_id.to_string(),
            pitch_accuracy: result.pitch_accuracy,
            rhythm_accuracy: result.rhythm_accuracy,
            timing_offset: result.timing_offset,
            confidence: result.confidence,
            detailed_scores,
            analyzed_at: Utc::now(),
        };

        let id = self
            .backend
            .insert_analysis(&row)
            .await
            .map_err(RecordingError::storage)?;
        log::info!(
            "Stored analysis {} for {} against {}",
            id,
            recording_id,
            reference_id
        );
        Ok(id)
    }

    /// Comparisons of a recording, oldest first
    pub async fn analyses(
        &self,
        recording_id: &str,
        reference_id: Option<&str>,
    ) -> crate::Result<Vec<StoredAnalysis>> {
        let rows = self
            .backend
            .list_analyses(recording_id, reference_id)
            .await
            .map_err(RecordingError::storage)?;
        rows.into_iter()
            .map(|row| {
                StoredAnalysis::try_from(row)
                    .map_err(|e| RecordingError::Storage(format!("unreadable detailed scores: {}", e)))
            })
            .collect()
    }

    /// Replace the score summary shown with a recording
    pub async fn attach_scores(&self, recording_id: &str, scores: &serde_json::Value) -> crate::Result<()> {
        let updated = self
            .backend
            .update_scores(recording_id, scores)
            .await
            .map_err(RecordingError::storage)?;
        if !updated {
            return Err(RecordingError::NotFound(format!("recording {}", recording_id)));
        }
        Ok(())
    }

    /// Decode any supported audio file and store it as a recording
    pub async fn import_file(
        &self,
        path: &Path,
        user_id: &str,
        reference_track_id: &str,
    ) -> crate::Result<String> {
        let waveform = load_waveform(path, CANONICAL_SAMPLE_RATE)?;
        log::info!("Importing {} ({:.2}s)", path.display(), waveform.duration_secs());
        self.save(RecordingRequest::new(user_id, reference_track_id), &waveform)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::SimilarityBreakdown;
    use crate::storage_backend::SqliteBackend;
    use async_trait::async_trait;

    fn sqlite_store(dir: &Path) -> RecordingStore {
        let backend = Arc::new(SqliteBackend::open(&dir.join("meta.db")).unwrap());
        RecordingStore::new(&dir.join("audio"), backend).unwrap()
    }

    fn tone(secs: f32) -> Waveform {
        let n = (secs * 44100.0) as usize;
        Waveform::mono(
            (0..n)
                .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
                .collect(),
            44100,
        )
    }

    fn result(pitch: f64) -> AnalysisResult {
        AnalysisResult {
            pitch_accuracy: pitch,
            rhythm_accuracy: 50.0,
            timing_offset: 0.25,
            confidence: 0.5,
            detailed_scores: DetailedScores::Measured(SimilarityBreakdown::default()),
        }
    }

    #[test]
    fn test_generated_id_shape() {
        let now = DateTime::parse_from_rfc3339("2024-03-01T18:30:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = generate_recording_id(now);
        assert!(id.starts_with("rec_20240301_183005_"));
        assert_eq!(id.len(), "rec_20240301_183005_".len() + 8);
        assert_ne!(id, generate_recording_id(now));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let waveform = tone(0.5);

        let id = store
            .save(RecordingRequest::new("u1", "lecha_dodi"), &waveform)
            .await
            .unwrap();
        let meta = store.load(&id).await.unwrap();

        assert_eq!(meta.user_id, "u1");
        assert_eq!(meta.reference_track_id, "lecha_dodi");
        assert_eq!(meta.sample_rate, 44100);
        assert!((meta.duration - 0.5).abs() < 1e-9);
        assert!(meta.scores.is_none());
        assert_eq!(store.load_waveform(&meta).unwrap(), waveform);
        assert!(!store.audio_dir().join(format!("{}.wav.partial", id)).exists());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        assert!(matches!(store.load("rec_missing").await, Err(RecordingError::NotFound(_))));
        assert!(matches!(
            store.attach_scores("rec_missing", &serde_json::json!({})).await,
            Err(RecordingError::NotFound(_))
        ));
        assert!(matches!(
            store.save_analysis("rec_missing", "ref", &result(1.0)).await,
            Err(RecordingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let w = tone(0.1);

        let mut ids = Vec::new();
        for i in 0..3 {
            let id = store
                .save(RecordingRequest::new("u1", "ref").with_id(format!("rec_{}", i)), &w)
                .await
                .unwrap();
            ids.push(id);
        }
        store.save(RecordingRequest::new("u2", "ref"), &w).await.unwrap();

        let listed: Vec<String> = store
            .list_by_user("u1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        ids.reverse();
        assert_eq!(listed, ids);

        let again: Vec<String> = store
            .list_by_user("u1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, again);
        assert_eq!(store.list_by_user("u1", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let w = tone(0.1);
        store.save(RecordingRequest::new("u1", "r").with_id("rec_x"), &w).await.unwrap();
        let second = store.save(RecordingRequest::new("u1", "r").with_id("rec_x"), &w).await;
        assert!(matches!(second, Err(RecordingError::Storage(_))));
    }

    #[tokio::test]
    async fn test_stray_blob_blocks_save_and_survives() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let stray = store.audio_dir().join("rec_taken.wav");
        std::fs::write(&stray, b"someone else's take").unwrap();

        let err = store
            .save(RecordingRequest::new("u1", "r").with_id("rec_taken"), &tone(0.1))
            .await
            .unwrap_err();
        assert!(matches!(err, RecordingError::Storage(_)));
        assert_eq!(std::fs::read(&stray).unwrap(), b"someone else's take");
        assert!(!store.audio_dir().join("rec_taken.wav.partial").exists());
        assert!(matches!(store.load("rec_taken").await, Err(RecordingError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_saves_of_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let (a, b) = (tone(0.3), tone(0.4));

        let (first, second) = tokio::join!(
            store.save(RecordingRequest::new("u1", "r").with_id("rec_a"), &a),
            store.save(RecordingRequest::new("u1", "r").with_id("rec_b"), &b),
        );
        assert_eq!(first.unwrap(), "rec_a");
        assert_eq!(second.unwrap(), "rec_b");
        assert_eq!(store.list_by_user("u1", 10).await.unwrap().len(), 2);
        assert_eq!(store.load_waveform(&store.load("rec_b").await.unwrap()).unwrap(), b);
    }

    #[tokio::test]
    async fn test_in_flight_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let _held = store.claim("rec_busy").unwrap();
        let result = store
            .save(RecordingRequest::new("u1", "r").with_id("rec_busy"), &tone(0.1))
            .await;
        assert!(matches!(result, Err(RecordingError::Storage(_))));
    }

    #[tokio::test]
    async fn test_analyses_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let id = store.save(RecordingRequest::new("u1", "r"), &tone(0.1)).await.unwrap();

        store.save_analysis(&id, "ref_a", &result(10.0)).await.unwrap();
        store.save_analysis(&id, "ref_a", &result(20.0)).await.unwrap();
        store.save_analysis(&id, "ref_b", &result(30.0)).await.unwrap();

        let all = store.analyses(&id, None).await.unwrap();
        let pitches: Vec<f64> = all.iter().map(|a| a.result.pitch_accuracy).collect();
        assert_eq!(pitches, vec![10.0, 20.0, 30.0]);
        assert_eq!(all[0].result, result(10.0));
        assert_eq!(store.analyses(&id, Some("ref_a")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_attach_scores() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let id = store.save(RecordingRequest::new("u1", "r"), &tone(0.1)).await.unwrap();
        let scores = result(42.0).summary_json();

        store.attach_scores(&id, &scores).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().scores, Some(scores));
    }

    #[tokio::test]
    async fn test_empty_waveform_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let empty = Waveform::mono(Vec::new(), 44100);
        assert!(matches!(
            store.save(RecordingRequest::new("u1", "r"), &empty).await,
            Err(RecordingError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_import_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(dir.path());
        let source = dir.path().join("cantor.wav");
        write_wav(&source, &Waveform::new(vec![0.1, 0.3, -0.1, -0.3], 44100, 2)).unwrap();

        let id = store.import_file(&source, "cantor", "adon_olam").await.unwrap();
        let meta = store.load(&id).await.unwrap();
        assert_eq!(meta.channels, 1);
        assert_eq!(store.load_waveform(&meta).unwrap().samples.len(), 2);
    }

    /// Backend whose inserts always fail
    struct FailingInsert(SqliteBackend);

    #[async_trait]
    impl StorageBackend for FailingInsert {
        async fn insert_recording(&self, _: &NewRecording) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
        async fn get_recording(&self, id: &str) -> anyhow::Result<Option<RecordingRow>> {
            self.0.get_recording(id).await
        }
        async fn list_recordings_by_user(
            &self,
            user_id: &str,
            limit: usize,
        ) -> anyhow::Result<Vec<RecordingRow>> {
            self.0.list_recordings_by_user(user_id, limit).await
        }
        async fn update_scores(&self, id: &str, scores: &serde_json::Value) -> anyhow::Result<bool> {
            self.0.update_scores(id, scores).await
        }
        async fn insert_analysis(&self, analysis: &NewAnalysis) -> anyhow::Result<i64> {
            self.0.insert_analysis(analysis).await
        }
        async fn list_analyses(
            &self,
            recording_id: &str,
            reference_id: Option<&str>,
        ) -> anyhow::Result<Vec<AnalysisRow>> {
            self.0.list_analyses(recording_id, reference_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_blob() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FailingInsert(SqliteBackend::in_memory().unwrap()));
        let store = RecordingStore::new(dir.path(), backend).unwrap();

        let result = store
            .save(RecordingRequest::new("u1", "r").with_id("rec_orphan"), &tone(0.1))
            .await;

        assert!(matches!(result, Err(RecordingError::Storage(_))));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
