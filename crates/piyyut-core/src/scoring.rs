//! Alignment and scoring of a candidate performance against a reference
//!
//! Primary scores (offset, pitch, rhythm, confidence) must succeed or the
//! whole comparison fails. The detailed similarity breakdown is best-effort:
//! if it cannot be computed the result carries [`DetailedScores::Unavailable`]
//! with zeroed fields.

use crate::audio::Waveform;
use crate::config::{AnalysisConfig, PitchDiffUnit};
use crate::error::RecordingError;
use crate::features::{
    detect_beats, extract_pitch_track, mono_samples, onset_strength, spectral_descriptors,
    BeatTrack, PitchTrack, SpectralDescriptors,
};
use anyhow::{Context, Result};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};


/// Outcome of one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Share of stable consecutive pitch steps, 0..=100
    pub pitch_accuracy: f64,
    /// Regularity of the beat grid, 0..=100
    pub rhythm_accuracy: f64,
    /// Seconds the candidate lags the reference (negative when it leads)
    pub timing_offset: f64,
    /// Weighted blend of pitch and rhythm accuracy, 0..=1
    pub confidence: f64,
    pub detailed_scores: DetailedScores,
}

impl AnalysisResult {
    /// Headline numbers, as attached to a stored recording
    pub fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "pitch_accuracy": self.pitch_accuracy,
            "rhythm_accuracy": self.rhythm_accuracy,
            "timing_offset": self.timing_offset,
            "confidence": self.confidence,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Paired {
    pub recording: f64,
    pub reference: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimilarityBreakdown {
    pub tonal_similarity: f64,
    pub timbre_similarity: f64,
    pub rhythm_similarity: f64,
    pub spectral_contrast: Paired,
    pub tempo_difference: f64,
    pub dynamic_range: Paired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetailedScores {
    Measured(SimilarityBreakdown),
    Unavailable {
        error: String,
        breakdown: SimilarityBreakdown,
    },
}

impl DetailedScores {
    pub fn breakdown(&self) -> &SimilarityBreakdown {
        match self {
            DetailedScores::Measured(b) => b,
            DetailedScores::Unavailable { breakdown, .. } => breakdown,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, DetailedScores::Measured(_))
    }
}

struct CandidateFeatures {
    pitch: PitchTrack,
    beats: BeatTrack,
    detail: Result<DetailFeatures>,
}

struct DetailFeatures {
    descriptors: SpectralDescriptors,
    envelope: Vec<f32>,
    tempo: f32,
    dynamic_range: f64,
}

/// Compares performances using a fixed analysis configuration
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: AnalysisConfig,
}

impl ScoringEngine {
    pub fn new(config: AnalysisConfig) -> crate::Result<Self> {
        config
            .validate()
            .map_err(|e| RecordingError::Config(e.to_string()))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Score `candidate` against `reference`
    pub fn compare(
        &self,
        candidate: &Waveform,
        reference: &Waveform,
    ) -> crate::Result<AnalysisResult> {
        self.compare_with(candidate, reference, Self::detail_features)
    }

    /// `detail` extracts the similarity features of one side; its failure only
    /// degrades the detailed scores
    fn compare_with<D>(
        &self,
        candidate: &Waveform,
        reference: &Waveform,
        detail: D,
    ) -> crate::Result<AnalysisResult>
    where
        D: Fn(&Self, &Waveform, Option<f32>) -> Result<DetailFeatures> + Sync,
    {
        check_input("candidate", candidate)?;
        check_input("reference", reference)?;
        if candidate.sample_rate != reference.sample_rate {
            return Err(RecordingError::Analysis(format!(
                "sample rates differ: {}Hz vs {}Hz",
                candidate.sample_rate, reference.sample_rate
            )));
        }

        let (candidate_side, reference_side) = rayon::join(
            || {
                rayon::join(
                    || estimate_offset(candidate, reference),
                    || self.candidate_features(candidate, &detail),
                )
            },
            || detail(self, reference, None),
        );
        let (offset, features) = candidate_side;
        let offset = offset.map_err(|e| RecordingError::Analysis(format!("{:#}", e)))?;
        let features = features.map_err(|e| RecordingError::Analysis(format!("{:#}", e)))?;

        let pitch_accuracy = pitch_accuracy(&features.pitch, &self.config);
        let rhythm_accuracy = rhythm_accuracy(&features.beats, &self.config);
        let confidence = confidence(pitch_accuracy, rhythm_accuracy, &self.config);

        let detailed_scores = match features
            .detail
            .and_then(|cand| Ok((cand, reference_side?)))
            .and_then(|(cand, refr)| similarity(&cand, &refr))
        {
            Ok(breakdown) => DetailedScores::Measured(breakdown),
            Err(e) => {
                log::warn!("Detailed scores unavailable: {:#}", e);
                DetailedScores::Unavailable {
                    error: format!("{:#}", e),
                    breakdown: SimilarityBreakdown::default(),
                }
            }
        };

        log::debug!(
            "Scored: pitch {:.1}, rhythm {:.1}, offset {:.3}s, confidence {:.2}",
            pitch_accuracy,
            rhythm_accuracy,
            offset,
            confidence
        );

        Ok(AnalysisResult {
            pitch_accuracy,
            rhythm_accuracy,
            timing_offset: offset,
            confidence,
            detailed_scores,
        })
    }

    fn candidate_features<D>(&self, waveform: &Waveform, detail: &D) -> Result<CandidateFeatures>
    where
        D: Fn(&Self, &Waveform, Option<f32>) -> Result<DetailFeatures> + Sync,
    {
        let cfg = &self.config;
        let (pitch, beats) = rayon::join(
            || extract_pitch_track(waveform, cfg.fmin, cfg.fmax, cfg),
            || detect_beats(waveform, cfg),
        );
        let pitch = pitch.context("pitch tracking failed")?;
        let beats = beats.context("beat tracking failed")?;
        let detail = detail(self, waveform, Some(beats.tempo));
        Ok(CandidateFeatures {
            pitch,
            beats,
            detail,
        })
    }

    fn detail_features(&self, waveform: &Waveform, tempo: Option<f32>) -> Result<DetailFeatures> {
        let descriptors = spectral_descriptors(waveform, &self.config)?;
        let envelope = onset_strength(waveform, &self.config)?.values;
        let tempo = match tempo {
            Some(t) => t,
            None => detect_beats(waveform, &self.config)?.tempo,
        };
        Ok(DetailFeatures {
            descriptors,
            envelope,
            tempo,
            dynamic_range: dynamic_range(&mono_samples(waveform)),
        })
    }
}

fn check_input(label: &str, waveform: &Waveform) -> crate::Result<()> {
    if waveform.is_empty() {
        return Err(RecordingError::Analysis(format!("{} waveform is empty", label)));
    }
    if waveform.sample_rate == 0 {
        return Err(RecordingError::Analysis(format!("{} has a sample rate of 0", label)));
    }
    if waveform.samples.iter().any(|s| !s.is_finite()) {
        return Err(RecordingError::Analysis(format!(
            "{} contains non-finite samples",
            label
        )));
    }
    Ok(())
}

/// Lag of `candidate` behind `reference` in seconds, from the peak of the
/// full cross-correlation
pub fn estimate_offset(candidate: &Waveform, reference: &Waveform) -> Result<f64> {
    let cand = mono_samples(candidate);
    let refr = mono_samples(reference);
    if cand.is_empty() || refr.is_empty() {
        anyhow::bail!("cannot correlate an empty waveform");
    }

    let full_len = cand.len() + refr.len() - 1;
    let n = full_len.next_power_of_two();
    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let padded = |x: &[f32]| -> Vec<Complex<f32>> {
        let mut buf = vec![Complex::new(0.0, 0.0); n];
        for (slot, &s) in buf.iter_mut().zip(x) {
            slot.re = s;
        }
        buf
    };
    let mut a = padded(cand.as_ref());
    let mut b = padded(refr.as_ref());
    forward.process(&mut a);
    forward.process(&mut b);
    for (x, y) in a.iter_mut().zip(&b) {
        *x *= y.conj();
    }
    inverse.process(&mut a);

    // Full index i corresponds to lag i - (len_ref - 1)
    let zero_lag = refr.len() - 1;
    let mut best_index = 0usize;
    let mut best_value = f32::NEG_INFINITY;
    for i in 0..full_len {
        let lag = i as isize - zero_lag as isize;
        let slot = lag.rem_euclid(n as isize) as usize;
        let value = a[slot].re;
        if value > best_value {
            best_value = value;
            best_index = i;
        }
    }

    let lag = best_index as isize - zero_lag as isize;
    Ok(lag as f64 / candidate.sample_rate as f64)
}

/// Percentage of consecutive voiced steps below the stability threshold
pub fn pitch_accuracy(track: &PitchTrack, config: &AnalysisConfig) -> f64 {
    let voiced = track.voiced_f0();
    if voiced.len() < 2 {
        return 0.0;
    }

    let stable = voiced
        .windows(2)
        .filter(|w| {
            let diff = match config.pitch_diff_unit {
                PitchDiffUnit::Semitones => 12.0 * (w[1] / w[0]).log2(),
                PitchDiffUnit::Hertz => w[1] - w[0],
            };
            diff.abs() < config.pitch_stability_threshold
        })
        .count();

    (stable as f64 / (voiced.len() - 1) as f64 * 100.0).clamp(0.0, 100.0)
}

/// 100 minus the beat-interval spread as a share of the allowed deviation
pub fn rhythm_accuracy(beats: &BeatTrack, config: &AnalysisConfig) -> f64 {
    if beats.beat_frames.len() < 2 {
        return 0.0;
    }

    let intervals: Vec<f64> = beats
        .beat_frames
        .windows(2)
        .map(|w| w[1] as f64 - w[0] as f64)
        .collect();
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let var = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
    let std = var.sqrt();

    (100.0 - std / config.max_rhythm_deviation as f64 * 100.0).clamp(0.0, 100.0)
}

pub fn confidence(pitch_accuracy: f64, rhythm_accuracy: f64, config: &AnalysisConfig) -> f64 {
    let blended =
        config.pitch_weight as f64 * pitch_accuracy + config.rhythm_weight as f64 * rhythm_accuracy;
    (blended / 100.0).clamp(0.0, 1.0)
}

/// Zero-lag normalized cross-correlation over the common length
fn normalized_correlation(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    let (mut dot, mut ea, mut eb) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a[..len].iter().zip(&b[..len]) {
        dot += x as f64 * y as f64;
        ea += x as f64 * x as f64;
        eb += y as f64 * y as f64;
    }
    if ea <= 0.0 || eb <= 0.0 {
        return 0.0;
    }
    dot / (ea.sqrt() * eb.sqrt())
}

fn percentile(sorted: &[f32], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] as f64 * (1.0 - frac) + sorted[hi] as f64 * frac
}

/// Spread between the 95th and 5th percentile of absolute amplitude
fn dynamic_range(samples: &[f32]) -> f64 {
    let mut magnitudes: Vec<f32> = samples.iter().map(|s| s.abs()).collect();
    magnitudes.sort_by(|a, b| a.total_cmp(b));
    percentile(&magnitudes, 95.0) - percentile(&magnitudes, 5.0)
}

fn similarity(cand: &DetailFeatures, refr: &DetailFeatures) -> Result<SimilarityBreakdown> {
    let flat_chroma = |d: &SpectralDescriptors| -> Vec<f32> {
        d.chroma.iter().flat_map(|c| c.iter().copied()).collect()
    };
    let flat_timbre = |d: &SpectralDescriptors| -> Vec<f32> {
        d.timbre.iter().flat_map(|c| c.iter().copied()).collect()
    };

    let breakdown = SimilarityBreakdown {
        tonal_similarity: normalized_correlation(
            &flat_chroma(&cand.descriptors),
            &flat_chroma(&refr.descriptors),
        ),
        timbre_similarity: normalized_correlation(
            &flat_timbre(&cand.descriptors),
            &flat_timbre(&refr.descriptors),
        ),
        rhythm_similarity: normalized_correlation(&cand.envelope, &refr.envelope),
        spectral_contrast: Paired {
            recording: cand.descriptors.contrast_mean() as f64,
            reference: refr.descriptors.contrast_mean() as f64,
        },
        tempo_difference: (cand.tempo - refr.tempo).abs() as f64,
        dynamic_range: Paired {
            recording: cand.dynamic_range,
            reference: refr.dynamic_range,
        },
    };

    let values = [
        breakdown.tonal_similarity,
        breakdown.timbre_similarity,
        breakdown.rhythm_similarity,
        breakdown.spectral_contrast.recording,
        breakdown.spectral_contrast.reference,
        breakdown.tempo_difference,
        breakdown.dynamic_range.recording,
        breakdown.dynamic_range.reference,
    ];
    if values.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("similarity measures are not finite");
    }

    Ok(breakdown)
}
