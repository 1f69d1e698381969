//! Error taxonomy shared by ingestion, scoring, storage and the session controller

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordingError {
    /// Capture device unavailable, busy or disconnected
    #[error("capture device error: {0}")]
    Device(String),

    /// File read, write or decode failure
    #[error("audio I/O error: {0}")]
    Io(String),

    /// Persistence layer failure
    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Scoring precondition violated (empty or mismatched waveforms)
    #[error("analysis error: {0}")]
    Analysis(String),

    #[error("capture ended without any samples")]
    EmptyCapture,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RecordingError {
    pub(crate) fn io(err: anyhow::Error) -> Self {
        Self::Io(format!("{:#}", err))
    }

    pub(crate) fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, RecordingError>;
