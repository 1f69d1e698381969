//! Signal ingestion: decoding, resampling, capture buffering and WAV persistence
//!
//! Everything downstream works on a mono [`Waveform`] at the canonical rate
//! (44.1 kHz by default). Supported inputs are WAV, MP3, FLAC, OGG and the
//! usual compressed containers (MP4/M4A/AAC, MKV, WebM) via Symphonia.

mod capture;
mod container;
#[cfg(feature = "cpal")]
mod cpal_input;
mod decoder;
mod gain;
mod resample;
mod writer;

pub use capture::{
    CaptureConfig, CaptureHandle, CapturedAudio, ChunkSink, InputDevice, ReplayInput,
    SignalIngestion,
};
pub use container::decode_with_symphonia;
#[cfg(feature = "cpal")]
pub use cpal_input::CpalInput;
pub use decoder::{decode_audio, load_waveform, read_audio, Waveform};
pub use gain::{normalize_loudness, rms_dbfs};
pub use resample::resample_to_target;
pub use writer::write_wav;

use std::path::Path;

/// Canonical sample rate for analysis and storage
pub const CANONICAL_SAMPLE_RATE: u32 = 44100;

/// Supported audio formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    // Pure audio formats
    Wav,
    Mp3,
    Flac,
    Ogg,

    // Containers decoded through Symphonia
    Mp4,
    Aac,
    Mkv,
    Webm,

    Unknown,
}

impl AudioFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("wav") | Some("wave") => AudioFormat::Wav,
            Some("mp3") => AudioFormat::Mp3,
            Some("flac") => AudioFormat::Flac,
            Some("ogg") | Some("oga") => AudioFormat::Ogg,

            Some("mp4") | Some("m4a") => AudioFormat::Mp4,
            Some("aac") => AudioFormat::Aac,
            Some("mkv") | Some("mka") => AudioFormat::Mkv,
            Some("webm") => AudioFormat::Webm,

            _ => AudioFormat::Unknown,
        }
    }

    /// Check if the format goes through the Symphonia probe
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            AudioFormat::Mp4 | AudioFormat::Aac | AudioFormat::Mkv | AudioFormat::Webm
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection_ignores_case() {
        assert_eq!(AudioFormat::from_path(Path::new("a/Lecha.MP3")), AudioFormat::Mp3);
        assert_eq!(AudioFormat::from_path(Path::new("take.wav")), AudioFormat::Wav);
        assert_eq!(AudioFormat::from_path(Path::new("x.m4a")), AudioFormat::Mp4);
        assert_eq!(AudioFormat::from_path(Path::new("notes.txt")), AudioFormat::Unknown);
        assert!(AudioFormat::Webm.is_container());
        assert!(!AudioFormat::Flac.is_container());
    }
}
