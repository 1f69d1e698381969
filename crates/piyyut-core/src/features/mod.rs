//! Feature extraction
//!
//! All extractors are pure: the same waveform and configuration always yield
//! the same features. Multi-channel input is down-mixed first.

mod onset;
mod pitch;
mod spectral;

pub use onset::{
    detect_beats, detect_onset_intervals, detect_onsets, onset_strength, BeatTrack, OnsetEnvelope,
};
pub(crate) use onset::frame_rms;
pub use pitch::{extract_pitch_track, PitchTrack};
pub use spectral::{spectral_descriptors, SpectralDescriptors};

use crate::audio::Waveform;
use crate::config::AnalysisConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub(crate) fn mono_samples(waveform: &Waveform) -> Cow<'_, [f32]> {
    if waveform.channels <= 1 {
        Cow::Borrowed(&waveform.samples)
    } else {
        Cow::Owned(waveform.to_mono())
    }
}

/// Compact description of a recording for display and history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSummary {
    pub duration: f64,
    pub tempo: f32,
    pub beat_times: Vec<f32>,
    /// Mean frame RMS
    pub average_volume: f32,
    /// Mean chroma vector
    pub pitch_profile: [f32; 12],
}

pub fn summarize(waveform: &Waveform, config: &AnalysisConfig) -> Result<AudioSummary> {
    let beats = detect_beats(waveform, config)?;
    let descriptors = spectral_descriptors(waveform, config)?;

    let rms = frame_rms(&mono_samples(waveform), config.frame_size, config.hop_size);
    let average_volume = if rms.is_empty() {
        0.0
    } else {
        rms.iter().sum::<f32>() / rms.len() as f32
    };

    Ok(AudioSummary {
        duration: waveform.duration_secs(),
        tempo: beats.tempo,
        beat_times: beats.beat_times,
        average_volume,
        pitch_profile: descriptors.chroma_profile(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_of_silence() {
        let config = AnalysisConfig::default();
        let silent = Waveform::mono(vec![0.0; 44100], 44100);
        let summary = summarize(&silent, &config).unwrap();

        assert!((summary.duration - 1.0).abs() < 1e-9);
        assert_eq!(summary.tempo, 0.0);
        assert!(summary.beat_times.is_empty());
        assert_eq!(summary.average_volume, 0.0);
        assert_eq!(summary.pitch_profile, [0.0; 12]);
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let stereo = Waveform::new(vec![0.5, -0.5, 0.25, 0.75], 44100, 2);
        assert_eq!(mono_samples(&stereo).as_ref(), &[0.0, 0.5]);
    }
}
