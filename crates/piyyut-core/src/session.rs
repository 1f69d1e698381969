//! Recording session controller
//!
//! Drives one practice take through Idle → Recording → Stopped → Saved →
//! Analyzed. Device problems move the session to Failed; starting again from
//! Failed is a soft reset.

use crate::audio::{CaptureHandle, CapturedAudio, SignalIngestion, Waveform};
use crate::error::RecordingError;
use crate::scoring::{AnalysisResult, ScoringEngine};
use crate::store::{RecordingRequest, RecordingStore};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Recording,
    Stopped,
    Saved,
    Analyzed,
    Failed,
}

pub struct RecordingSession {
    ingestion: SignalIngestion,
    store: Arc<RecordingStore>,
    engine: Arc<ScoringEngine>,
    state: SessionState,
    capture: Option<CaptureHandle>,
    pending: Option<Waveform>,
    recovered: Option<Waveform>,
    last_error: Option<RecordingError>,
    last_recording_id: Option<String>,
    last_analysis: Option<AnalysisResult>,
}

impl RecordingSession {
    pub fn new(
        ingestion: SignalIngestion,
        store: Arc<RecordingStore>,
        engine: Arc<ScoringEngine>,
    ) -> Self {
        Self {
            ingestion,
            store,
            engine,
            state: SessionState::Idle,
            capture: None,
            pending: None,
            recovered: None,
            last_error: None,
            last_recording_id: None,
            last_analysis: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_error(&self) -> Option<&RecordingError> {
        self.last_error.as_ref()
    }

    pub fn last_recording_id(&self) -> Option<&str> {
        self.last_recording_id.as_deref()
    }

    pub fn last_analysis(&self) -> Option<&AnalysisResult> {
        self.last_analysis.as_ref()
    }

    /// The stopped, not yet saved take
    pub fn pending_waveform(&self) -> Option<&Waveform> {
        self.pending.as_ref()
    }

    /// Partial audio kept from a capture that ended in a device fault
    pub fn take_recovered(&mut self) -> Option<Waveform> {
        self.recovered.take()
    }

    fn fail(&mut self, error: RecordingError) {
        log::warn!("Session failed: {}", error);
        self.last_error = Some(error);
        self.state = SessionState::Failed;
    }

    /// Begin a new take; false if already recording or the device cannot open
    pub fn start_recording(&mut self) -> bool {
        if self.state == SessionState::Recording {
            return false;
        }
        if self.state == SessionState::Failed {
            log::info!("Resetting failed session");
            self.last_error = None;
        }
        if self.pending.take().is_some() {
            log::warn!("Discarding unsaved take");
        }

        match self.ingestion.begin_capture() {
            Ok(handle) => {
                self.capture = Some(handle);
                self.state = SessionState::Recording;
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn finish_capture(&mut self, handle: CaptureHandle) -> Option<Waveform> {
        match self.ingestion.end_capture(handle) {
            Ok(CapturedAudio {
                waveform,
                fault: None,
                dropped_chunks,
            }) => {
                if dropped_chunks > 0 {
                    log::warn!("Take lost {} chunks to a full queue", dropped_chunks);
                }
                self.pending = Some(waveform.clone());
                self.state = SessionState::Stopped;
                Some(waveform)
            }
            Ok(CapturedAudio {
                waveform,
                fault: Some(message),
                ..
            }) => {
                log::info!(
                    "Recovered {:.2}s of audio before the device fault",
                    waveform.duration_secs()
                );
                self.recovered = Some(waveform);
                self.fail(RecordingError::Device(message));
                None
            }
            Err(RecordingError::EmptyCapture) => {
                log::info!("Take had no audio, back to idle");
                self.state = SessionState::Idle;
                None
            }
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    /// End the take; None if nothing was recording or no audio arrived
    pub fn stop_recording(&mut self) -> Option<Waveform> {
        if self.state != SessionState::Recording {
            return None;
        }
        let handle = self.capture.take()?;
        self.finish_capture(handle)
    }

    /// Check a running capture for a device fault; true if the session failed
    pub fn poll_device(&mut self) -> bool {
        if self.state != SessionState::Recording {
            return false;
        }
        let faulted = self
            .capture
            .as_ref()
            .map_or(false, |handle| handle.fault().is_some());
        if !faulted {
            return false;
        }

        if let Some(handle) = self.capture.take() {
            self.finish_capture(handle);
        }
        if self.state != SessionState::Failed {
            // The fault arrived with no audio buffered
            self.fail(RecordingError::Device("input device fault".to_string()));
        }
        true
    }

    /// Persist the stopped take
    pub async fn save_recording(
        &mut self,
        user_id: &str,
        reference_id: &str,
    ) -> crate::Result<String> {
        let waveform = match (self.state, self.pending.as_ref()) {
            (SessionState::Stopped, Some(waveform)) => waveform,
            (state, _) => {
                return Err(RecordingError::Storage(format!(
                    "nothing to save while {:?}",
                    state
                )))
            }
        };

        match self
            .store
            .save(RecordingRequest::new(user_id, reference_id), waveform)
            .await
        {
            Ok(id) => {
                self.pending = None;
                self.last_error = None;
                self.last_recording_id = Some(id.clone());
                self.state = SessionState::Saved;
                Ok(id)
            }
            Err(e) => {
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Score a stored recording against a stored reference and keep the result
    ///
    /// Only valid once the take is saved. Use [`compare_stored`] to score
    /// stored ids without touching the session.
    pub async fn compare_with_reference(
        &mut self,
        recording_id: &str,
        reference_id: &str,
    ) -> crate::Result<AnalysisResult> {
        if !matches!(self.state, SessionState::Saved | SessionState::Analyzed) {
            return Err(RecordingError::Analysis(format!(
                "no saved take to compare while {:?}",
                self.state
            )));
        }

        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        match compare_stored(store, engine, recording_id, reference_id).await {
            Ok(result) => {
                self.last_error = None;
                self.last_analysis = Some(result.clone());
                self.state = SessionState::Analyzed;
                Ok(result)
            }
            Err(e) => {
                log::warn!("Comparison of {} against {} failed: {}", recording_id, reference_id, e);
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }
}

/// Score two stored recordings, append the analysis and attach its summary
pub async fn compare_stored(
    store: Arc<RecordingStore>,
    engine: Arc<ScoringEngine>,
    recording_id: &str,
    reference_id: &str,
) -> crate::Result<AnalysisResult> {
    let candidate_meta = store.load(recording_id).await?;
    let reference_meta = store.load(reference_id).await?;

    let worker_store = Arc::clone(&store);
    let result = tokio::task::spawn_blocking(move || {
        let rate = engine.config().sample_rate;
        let candidate = worker_store
            .load_waveform(&candidate_meta)?
            .into_canonical(rate)
            .map_err(RecordingError::io)?;
        let reference = worker_store
            .load_waveform(&reference_meta)?
            .into_canonical(rate)
            .map_err(RecordingError::io)?;
        engine.compare(&candidate, &reference)
    })
    .await
    .map_err(|e| RecordingError::Analysis(format!("scoring task failed: {}", e)))??;

    store.save_analysis(recording_id, reference_id, &result).await?;
    store.attach_scores(recording_id, &result.summary_json()).await?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CaptureConfig, ReplayInput};
    use crate::config::AnalysisConfig;
    use crate::storage_backend::SqliteBackend;
    use std::path::Path;
    use std::time::Duration;

    fn tone(secs: f32, freq: f32) -> Waveform {
        let n = (secs * 44100.0) as usize;
        Waveform::mono(
            (0..n)
                .map(|i| 0.4 * (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin())
                .collect(),
            44100,
        )
    }

    fn open_store(dir: &Path) -> Arc<RecordingStore> {
        let backend = Arc::new(SqliteBackend::open(&dir.join("meta.db")).unwrap());
        Arc::new(RecordingStore::new(&dir.join("audio"), backend).unwrap())
    }

    fn session_with(device: ReplayInput, store: Arc<RecordingStore>) -> RecordingSession {
        let ingestion = SignalIngestion::new(Box::new(device), CaptureConfig::default(), 44100);
        let engine = Arc::new(ScoringEngine::new(AnalysisConfig::default()).unwrap());
        RecordingSession::new(ingestion, store, engine)
    }

    #[tokio::test]
    async fn test_full_practice_flow() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let reference_id = store
            .save(RecordingRequest::new("cantor", "lecha_dodi"), &tone(1.0, 220.0))
            .await
            .unwrap();

        let mut session = session_with(ReplayInput::new(tone(1.0, 220.0), 1024), store.clone());
        assert_eq!(session.state(), SessionState::Idle);

        assert!(session.start_recording());
        assert!(!session.start_recording());
        let take = session.stop_recording().unwrap();
        assert_eq!(take.samples.len(), 44100);
        assert_eq!(session.state(), SessionState::Stopped);

        let id = session.save_recording("u1", "lecha_dodi").await.unwrap();
        assert_eq!(session.state(), SessionState::Saved);
        assert_eq!(session.last_recording_id(), Some(id.as_str()));

        let first = session.compare_with_reference(&id, &reference_id).await.unwrap();
        assert_eq!(session.state(), SessionState::Analyzed);
        assert!((0.0..=1.0).contains(&first.confidence));

        session.compare_with_reference(&id, &reference_id).await.unwrap();
        assert_eq!(store.analyses(&id, Some(&reference_id)).await.unwrap().len(), 2);

        let meta = store.load(&id).await.unwrap();
        assert_eq!(meta.scores, Some(first.summary_json()));
    }

    #[tokio::test]
    async fn test_stop_with_no_audio_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(
            ReplayInput::new(Waveform::mono(Vec::new(), 44100), 1024),
            open_store(dir.path()),
        );

        assert!(session.start_recording());
        assert!(session.stop_recording().is_none());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_stop_when_idle_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(ReplayInput::new(tone(0.1, 220.0), 512), open_store(dir.path()));
        assert!(session.stop_recording().is_none());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_unavailable_device_fails_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(ReplayInput::disconnected(), open_store(dir.path()));

        assert!(!session.start_recording());
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(session.last_error(), Some(RecordingError::Device(_))));
    }

    #[test]
    fn test_disconnect_keeps_partial_take() {
        let dir = tempfile::tempdir().unwrap();
        let device = ReplayInput::new(tone(1.0, 220.0), 1000).disconnect_after(5);
        let mut session = session_with(device, open_store(dir.path()));

        assert!(session.start_recording());
        assert!(session.stop_recording().is_none());
        assert_eq!(session.state(), SessionState::Failed);
        assert!(matches!(session.last_error(), Some(RecordingError::Device(_))));

        let recovered = session.take_recovered().unwrap();
        assert_eq!(recovered.samples.len(), 5000);
        assert!(session.take_recovered().is_none());

        // Failed is a soft reset point
        assert!(session.start_recording());
        assert_eq!(session.state(), SessionState::Recording);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_poll_detects_fault_while_recording() {
        let dir = tempfile::tempdir().unwrap();
        let device = ReplayInput::new(tone(1.0, 220.0), 1000).disconnect_after(3);
        let mut session = session_with(device, open_store(dir.path()));
        assert!(session.start_recording());

        let mut detected = false;
        for _ in 0..200 {
            if session.poll_device() {
                detected = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(detected);
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.take_recovered().unwrap().samples.len(), 3000);
    }

    #[tokio::test]
    async fn test_save_requires_a_stopped_take() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(ReplayInput::new(tone(0.1, 220.0), 512), open_store(dir.path()));
        assert!(session.save_recording("u1", "r").await.is_err());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_failed_save_stays_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let mut session = session_with(ReplayInput::new(tone(0.2, 220.0), 512), store.clone());

        assert!(session.start_recording());
        session.stop_recording().unwrap();
        std::fs::remove_dir_all(store.audio_dir()).unwrap();

        let err = session.save_recording("u1", "r").await.unwrap_err();
        assert!(matches!(err, RecordingError::Storage(_)));
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.last_error(), Some(&err));

        // Retry once the directory is back
        std::fs::create_dir_all(store.audio_dir()).unwrap();
        session.save_recording("u1", "r").await.unwrap();
        assert_eq!(session.state(), SessionState::Saved);
    }

    #[tokio::test]
    async fn test_compare_unknown_reference() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_with(ReplayInput::new(tone(0.2, 220.0), 512), open_store(dir.path()));
        assert!(session.start_recording());
        session.stop_recording().unwrap();
        let id = session.save_recording("u1", "r").await.unwrap();

        let err = session.compare_with_reference(&id, "rec_other").await.unwrap_err();
        assert!(matches!(err, RecordingError::NotFound(_)));
        assert_eq!(session.state(), SessionState::Saved);
    }

    #[tokio::test]
    async fn test_compare_while_recording_leaves_capture_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let reference_id = store
            .save(RecordingRequest::new("cantor", "r"), &tone(0.5, 220.0))
            .await
            .unwrap();
        let mut session = session_with(ReplayInput::new(tone(0.5, 220.0), 1024), store);

        assert!(session.start_recording());
        let err = session
            .compare_with_reference(&reference_id, &reference_id)
            .await
            .unwrap_err();
        assert!(matches!(err, RecordingError::Analysis(_)));
        assert_eq!(session.state(), SessionState::Recording);

        let take = session.stop_recording().unwrap();
        assert_eq!(take.samples.len(), 22050);
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.start_recording());
    }

    #[tokio::test]
    async fn test_compare_before_save_keeps_take_savable() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let reference_id = store
            .save(RecordingRequest::new("cantor", "r"), &tone(0.5, 220.0))
            .await
            .unwrap();
        let mut session = session_with(ReplayInput::new(tone(0.5, 220.0), 1024), store);

        assert!(session.start_recording());
        session.stop_recording().unwrap();
        assert!(session
            .compare_with_reference(&reference_id, &reference_id)
            .await
            .is_err());
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.pending_waveform().is_some());

        let id = session.save_recording("u1", "r").await.unwrap();
        session.compare_with_reference(&id, &reference_id).await.unwrap();
        assert_eq!(session.state(), SessionState::Analyzed);
    }
}
