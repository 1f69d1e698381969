//! Configuration parameters for feature extraction and scoring
//!
//! Defaults follow the values the practice app has always scored with.

use serde::{Deserialize, Serialize};

/// Unit in which consecutive pitch differences are compared to the stability threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitchDiffUnit {
    Semitones,
    Hertz,
}

/// Analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    // Audio processing
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,

    // Pitch tracking (YIN)
    pub fmin: f32,
    pub fmax: f32,
    pub yin_threshold: f32,
    pub voicing_rms_floor: f32,

    // Pitch accuracy
    pub pitch_stability_threshold: f32,
    pub pitch_diff_unit: PitchDiffUnit,

    // Rhythm accuracy, in onset-envelope frames
    pub max_rhythm_deviation: f32,

    // Confidence blend
    pub pitch_weight: f32,
    pub rhythm_weight: f32,

    // Beat tracking
    pub tempo_prior_bpm: f32,
    pub min_tempo_bpm: f32,
    pub max_tempo_bpm: f32,
    pub beat_tightness: f32,

    // Silence splitting
    pub silence_threshold_db: f32,
    pub min_silence_secs: f32,

    // Spectral descriptors
    pub n_mfcc: usize,
    pub n_mels: usize,
    pub n_contrast_bands: usize,
    pub contrast_fmin: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_size: 2048,
            hop_size: 512,

            // C2 .. C7
            fmin: 65.406,
            fmax: 2093.0,
            yin_threshold: 0.15,
            voicing_rms_floor: 1e-3,

            pitch_stability_threshold: 1.0,
            pitch_diff_unit: PitchDiffUnit::Semitones,

            max_rhythm_deviation: 10.0,

            pitch_weight: 0.6,
            rhythm_weight: 0.4,

            tempo_prior_bpm: 120.0,
            min_tempo_bpm: 30.0,
            max_tempo_bpm: 300.0,
            beat_tightness: 100.0,

            silence_threshold_db: 40.0,
            min_silence_secs: 0.3,

            n_mfcc: 13,
            n_mels: 40,
            n_contrast_bands: 6,
            contrast_fmin: 200.0,
        }
    }
}

impl AnalysisConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_rate == 0 {
            anyhow::bail!("Sample rate must be > 0");
        }
        if self.hop_size == 0 || self.frame_size < self.hop_size {
            anyhow::bail!("hop_size must be > 0 and <= frame_size");
        }
        if !self.frame_size.is_power_of_two() {
            anyhow::bail!("frame_size must be a power of two");
        }
        if self.fmin <= 0.0 || self.fmin >= self.fmax {
            anyhow::bail!("fmin must be > 0 and < fmax");
        }
        if self.fmax >= self.sample_rate as f32 / 2.0 {
            anyhow::bail!("fmax must be below the Nyquist frequency");
        }
        if self.max_rhythm_deviation <= 0.0 {
            anyhow::bail!("max_rhythm_deviation must be > 0");
        }
        if self.pitch_weight < 0.0 || self.rhythm_weight < 0.0 {
            anyhow::bail!("confidence weights must be non-negative");
        }
        if self.pitch_weight + self.rhythm_weight <= 0.0 {
            anyhow::bail!("confidence weights must not both be zero");
        }
        if self.min_tempo_bpm <= 0.0 || self.min_tempo_bpm >= self.max_tempo_bpm {
            anyhow::bail!("min_tempo_bpm must be > 0 and < max_tempo_bpm");
        }
        if self.n_mfcc == 0 || self.n_mfcc > self.n_mels {
            anyhow::bail!("n_mfcc must be between 1 and n_mels");
        }
        Ok(())
    }

    /// Onset-envelope frames per second
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / self.hop_size as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.frame_rate() - 86.13).abs() < 0.01);
    }

    #[test]
    fn test_rejects_inverted_pitch_range() {
        let config = AnalysisConfig {
            fmin: 500.0,
            fmax: 100.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_weights() {
        let config = AnalysisConfig {
            pitch_weight: 0.0,
            rhythm_weight: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
