//! Piyyut Core - practice recording and scoring engine
//!
//! Records a singer, extracts pitch and rhythm features, aligns the take
//! against a reference performance and keeps a history of attempts.

pub mod audio;
pub mod config;
pub mod error;
pub mod features;
pub mod lyrics;
pub mod scoring;
pub mod session;
pub mod storage_backend;
pub mod storage_config;
pub mod store;
pub mod transform;

pub use audio::{load_waveform, SignalIngestion, Waveform, CANONICAL_SAMPLE_RATE};
pub use config::{AnalysisConfig, PitchDiffUnit};
pub use error::{RecordingError, Result};
pub use features::{summarize, AudioSummary};
pub use lyrics::{align_words_to_intervals, align_words_to_onsets, LyricTiming, LyricTrack};
pub use scoring::{AnalysisResult, DetailedScores, ScoringEngine, SimilarityBreakdown};
pub use session::{compare_stored, RecordingSession, SessionState};
pub use storage_backend::{PostgresqlBackend, SqliteBackend, StorageBackend};
pub use storage_config::PiyyutConfig;
pub use store::{RecordingMetadata, RecordingRequest, RecordingStore, StoredAnalysis};

/// Score two audio files directly, without the store
pub fn compare_files(
    candidate: &std::path::Path,
    reference: &std::path::Path,
    config: &AnalysisConfig,
) -> Result<AnalysisResult> {
    let engine = ScoringEngine::new(config.clone())?;
    let candidate = load_waveform(candidate, config.sample_rate)?;
    let reference = load_waveform(reference, config.sample_rate)?;
    engine.compare(&candidate, &reference)
}
