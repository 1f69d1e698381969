//! Onset envelope, onset picking, tempo and beat tracking, silence splitting

use super::mono_samples;
use crate::audio::Waveform;
use crate::config::AnalysisConfig;
use crate::transform::compute_stft;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Onset strength per STFT frame
#[derive(Debug, Clone, PartialEq)]
pub struct OnsetEnvelope {
    pub values: Vec<f32>,
    /// Frames per second
    pub frame_rate: f32,
}

/// Estimated tempo and beat positions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatTrack {
    /// Beats per minute, 0 when no pulse was found
    pub tempo: f32,
    pub beat_frames: Vec<usize>,
    pub beat_times: Vec<f32>,
}

impl BeatTrack {
    fn none() -> Self {
        Self {
            tempo: 0.0,
            beat_frames: Vec::new(),
            beat_times: Vec::new(),
        }
    }
}

/// Log-magnitude spectral flux
pub fn onset_strength(waveform: &Waveform, config: &AnalysisConfig) -> Result<OnsetEnvelope> {
    let samples = mono_samples(waveform);
    let spec = compute_stft(&samples, waveform.sample_rate, config.frame_size, config.hop_size)?;

    let log_mags: Vec<Vec<f32>> = spec
        .magnitudes
        .iter()
        .map(|frame| frame.iter().map(|&m| (1.0 + 100.0 * m).ln()).collect())
        .collect();

    // Frame 0 is measured against silence so a sound starting at t = 0 counts
    let silence = vec![0.0f32; spec.num_bins];
    let values: Vec<f32> = (0..spec.num_frames)
        .map(|t| {
            let prev = if t == 0 { &silence } else { &log_mags[t - 1] };
            let flux: f32 = log_mags[t]
                .iter()
                .zip(prev)
                .map(|(&cur, &prev)| (cur - prev).max(0.0))
                .sum();
            flux / spec.num_bins as f32
        })
        .collect();

    Ok(OnsetEnvelope {
        values,
        frame_rate: waveform.sample_rate as f32 / config.hop_size as f32,
    })
}

/// Peak-picked onset frames of a normalized envelope
fn pick_peaks(envelope: &OnsetEnvelope) -> Vec<usize> {
    let values = &envelope.values;
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if values.is_empty() || max - min <= 1e-9 {
        return Vec::new();
    }
    let norm: Vec<f32> = values.iter().map(|&v| (v - min) / (max - min)).collect();

    let fr = envelope.frame_rate;
    let pre_max = (0.03 * fr).round() as usize;
    let avg_span = (0.10 * fr).round() as usize;
    let wait = (0.03 * fr).round() as usize;
    let delta = 0.07;

    let mut onsets = Vec::new();
    let mut last: Option<usize> = None;
    for n in 0..norm.len() {
        let lo = n.saturating_sub(pre_max);
        if norm[lo..=n].iter().any(|&v| v > norm[n]) {
            continue;
        }
        let a_lo = n.saturating_sub(avg_span);
        let a_hi = (n + avg_span + 1).min(norm.len());
        let mean = norm[a_lo..a_hi].iter().sum::<f32>() / (a_hi - a_lo) as f32;
        if norm[n] < mean + delta {
            continue;
        }
        if let Some(prev) = last {
            if n <= prev + wait {
                continue;
            }
        }
        onsets.push(n);
        last = Some(n);
    }
    onsets
}

/// Onset times in seconds
pub fn detect_onsets(waveform: &Waveform, config: &AnalysisConfig) -> Result<Vec<f32>> {
    let envelope = onset_strength(waveform, config)?;
    let onsets: Vec<f32> = pick_peaks(&envelope)
        .into_iter()
        .map(|f| f as f32 / envelope.frame_rate)
        .collect();
    log::debug!("Detected {} onsets", onsets.len());
    Ok(onsets)
}

/// Tempo in BPM from the prior-weighted autocorrelation of the envelope
fn estimate_tempo(envelope: &OnsetEnvelope, config: &AnalysisConfig) -> Option<f32> {
    let values = &envelope.values;
    let fr = envelope.frame_rate;
    let min_lag = ((60.0 * fr / config.max_tempo_bpm).floor() as usize).max(1);
    let max_lag = ((60.0 * fr / config.min_tempo_bpm).ceil() as usize).min(values.len().saturating_sub(1));
    if min_lag > max_lag {
        return None;
    }

    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let centered: Vec<f32> = values.iter().map(|&v| v - mean).collect();

    let mut best: Option<(usize, f32)> = None;
    for lag in min_lag..=max_lag {
        let ac: f32 = centered[..centered.len() - lag]
            .iter()
            .zip(&centered[lag..])
            .map(|(a, b)| a * b)
            .sum();
        let bpm = 60.0 * fr / lag as f32;
        let octaves = (bpm / config.tempo_prior_bpm).log2();
        let weighted = ac * (-0.5 * octaves * octaves).exp();
        if weighted > 0.0 && best.map_or(true, |(_, w)| weighted > w) {
            best = Some((lag, weighted));
        }
    }

    best.map(|(lag, _)| 60.0 * fr / lag as f32)
}

/// Dynamic-programming beat tracker (D. Ellis, 2007)
fn track_beats(envelope: &[f32], period: f32, tightness: f32) -> Vec<usize> {
    let n = envelope.len();

    let mean = envelope.iter().sum::<f32>() / n as f32;
    let var = envelope.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / (n.max(2) - 1) as f32;
    let std = var.sqrt();
    if std <= 1e-9 {
        return Vec::new();
    }
    let normalized: Vec<f32> = envelope.iter().map(|&v| v / std).collect();

    // Smooth with a Gaussian one period wide
    let radius = period.round() as isize;
    let kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-0.5 * (i as f32 * 32.0 / period).powi(2)).exp())
        .collect();
    let local: Vec<f32> = (0..n as isize)
        .map(|t| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, &w)| {
                    let idx = t + k as isize - radius;
                    if idx >= 0 && (idx as usize) < n {
                        w * normalized[idx as usize]
                    } else {
                        0.0
                    }
                })
                .sum()
        })
        .collect();

    let max_back = (2.0 * period).round() as usize;
    let min_back = ((period / 2.0).round() as usize).max(1);

    let mut cumscore = vec![0.0f32; n];
    let mut backlink: Vec<Option<usize>> = vec![None; n];
    for t in 0..n {
        let mut best: Option<(usize, f32)> = None;
        if t >= min_back {
            let lo = t.saturating_sub(max_back);
            for prev in lo..=(t - min_back) {
                let interval = (t - prev) as f32;
                let penalty = -tightness * (interval / period).ln().powi(2);
                let score = cumscore[prev] + penalty;
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((prev, score));
                }
            }
        }
        match best {
            Some((prev, score)) if score > 0.0 => {
                cumscore[t] = local[t] + score;
                backlink[t] = Some(prev);
            }
            _ => cumscore[t] = local[t],
        }
    }

    // Last beat: the final local maximum of the cumulative score above half
    // the median of all local maxima
    let maxima: Vec<usize> = (1..n.saturating_sub(1))
        .filter(|&t| cumscore[t] > cumscore[t - 1] && cumscore[t] >= cumscore[t + 1])
        .collect();
    if maxima.is_empty() {
        return Vec::new();
    }
    let mut peak_scores: Vec<f32> = maxima.iter().map(|&t| cumscore[t]).collect();
    peak_scores.sort_by(|a, b| a.total_cmp(b));
    let median = peak_scores[peak_scores.len() / 2];
    let last = match maxima.iter().rev().find(|&&t| cumscore[t] >= 0.5 * median) {
        Some(&t) => t,
        None => return Vec::new(),
    };

    let mut beats = vec![last];
    let mut cursor = last;
    while let Some(prev) = backlink[cursor] {
        beats.push(prev);
        cursor = prev;
    }
    beats.reverse();

    // Trim weak leading and trailing beats
    let rms = (beats.iter().map(|&b| local[b] * local[b]).sum::<f32>() / beats.len() as f32).sqrt();
    let floor = 0.5 * rms;
    let first = beats.iter().position(|&b| local[b] >= floor).unwrap_or(0);
    let end = beats
        .iter()
        .rposition(|&b| local[b] >= floor)
        .map_or(beats.len(), |i| i + 1);
    beats[first..end].to_vec()
}

/// Global tempo and beat positions; an empty track for silent or arrhythmic input
pub fn detect_beats(waveform: &Waveform, config: &AnalysisConfig) -> Result<BeatTrack> {
    let envelope = onset_strength(waveform, config)?;
    if envelope.values.len() < 3 {
        return Ok(BeatTrack::none());
    }

    let tempo = match estimate_tempo(&envelope, config) {
        Some(tempo) => tempo,
        None => {
            log::debug!("No periodicity in onset envelope");
            return Ok(BeatTrack::none());
        }
    };

    let period = 60.0 * envelope.frame_rate / tempo;
    let beat_frames = track_beats(&envelope.values, period, config.beat_tightness);
    let beat_times = beat_frames
        .iter()
        .map(|&f| f as f32 / envelope.frame_rate)
        .collect();

    log::debug!("Tempo {:.1} BPM, {} beats", tempo, beat_frames.len());

    Ok(BeatTrack {
        tempo,
        beat_frames,
        beat_times,
    })
}

/// RMS per centred frame
pub(crate) fn frame_rms(samples: &[f32], frame_size: usize, hop: usize) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let half = (frame_size / 2) as isize;
    (0..1 + samples.len() / hop)
        .map(|t| {
            let start = (t * hop) as isize - half;
            let lo = start.max(0) as usize;
            let hi = ((start + frame_size as isize).max(0) as usize).min(samples.len());
            let energy: f32 = samples[lo..hi].iter().map(|&s| s * s).sum();
            (energy / frame_size as f32).sqrt()
        })
        .collect()
}

/// Non-silent `(start, end)` intervals in seconds
///
/// A frame is silent when its level is more than `threshold_db` below the
/// loudest frame. Silences shorter than `min_silence_secs` do not split.
pub fn detect_onset_intervals(
    waveform: &Waveform,
    threshold_db: f32,
    min_silence_secs: f32,
    config: &AnalysisConfig,
) -> Vec<(f32, f32)> {
    let samples = mono_samples(waveform);
    let hop = config.hop_size;
    let rms = frame_rms(&samples, config.frame_size, hop);
    let peak = rms.iter().cloned().fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return Vec::new();
    }

    let active: Vec<bool> = rms
        .iter()
        .map(|&r| r > 0.0 && 20.0 * (r / peak).log10() > -threshold_db)
        .collect();

    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut t = 0;
    while t < active.len() {
        if active[t] {
            let start = t;
            while t < active.len() && active[t] {
                t += 1;
            }
            runs.push((start, t));
        } else {
            t += 1;
        }
    }

    let sr = waveform.sample_rate as f32;
    let min_gap_frames = (min_silence_secs * sr / hop as f32).ceil() as usize;
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for run in runs {
        match merged.last_mut() {
            Some(last) if run.0 - last.1 < min_gap_frames => last.1 = run.1,
            _ => merged.push(run),
        }
    }

    let len = samples.len();
    merged
        .into_iter()
        .map(|(start, end)| {
            let s = (start * hop).min(len) as f32 / sr;
            let e = (end * hop).min(len) as f32 / sr;
            (s, e)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// Short 220Hz bursts every `period` samples
    fn pulses(period: usize, count: usize, sr: u32) -> Waveform {
        let burst = 2048;
        let mut samples = vec![0.0f32; period * count];
        for p in 0..count {
            for i in 0..burst {
                let env = 1.0 - i as f32 / burst as f32;
                samples[p * period + i] = 0.8 * env * (2.0 * PI * 220.0 * i as f32 / sr as f32).sin();
            }
        }
        Waveform::mono(samples, sr)
    }

    #[test]
    fn test_onsets_land_on_bursts() {
        let config = AnalysisConfig::default();
        let w = pulses(22016, 8, 44100);
        let onsets = detect_onsets(&w, &config).unwrap();

        assert_eq!(onsets.len(), 8);
        for (i, t) in onsets.iter().enumerate() {
            let expected = (i * 22016) as f32 / 44100.0;
            assert!((t - expected).abs() < 0.05, "onset {} at {}", i, t);
        }
    }

    #[test]
    fn test_sound_at_start_has_flux_in_first_frame() {
        let config = AnalysisConfig::default();
        let envelope = onset_strength(&pulses(22016, 2, 44100), &config).unwrap();
        assert!(envelope.values[0] > 0.0);
        assert!(envelope.values[0] > envelope.values[1]);
    }

    #[test]
    fn test_tempo_of_regular_pulse() {
        let config = AnalysisConfig::default();
        // 43 hops between bursts, about 120 BPM
        let w = pulses(43 * 512, 20, 44100);
        let beats = detect_beats(&w, &config).unwrap();

        assert!((beats.tempo - 120.2).abs() < 3.0, "tempo {}", beats.tempo);
        assert!(beats.beat_frames.len() >= 10);
        for pair in beats.beat_frames.windows(2) {
            let gap = pair[1] as i64 - pair[0] as i64;
            assert!((gap - 43).abs() <= 2, "gap {}", gap);
        }
    }

    #[test]
    fn test_silence_has_no_beats() {
        let config = AnalysisConfig::default();
        let silent = Waveform::mono(vec![0.0; 44100 * 2], 44100);
        let beats = detect_beats(&silent, &config).unwrap();
        assert_eq!(beats.tempo, 0.0);
        assert!(beats.beat_frames.is_empty());
        assert!(detect_onsets(&silent, &config).unwrap().is_empty());
    }

    #[test]
    fn test_intervals_split_on_long_silence() {
        let config = AnalysisConfig::default();
        let sr = 44100;
        let tone: Vec<f32> = (0..sr / 2)
            .map(|i| 0.5 * (2.0 * PI * 330.0 * i as f32 / sr as f32).sin())
            .collect();
        let mut samples = tone.clone();
        samples.extend(vec![0.0; sr]);
        samples.extend(&tone);
        let w = Waveform::mono(samples, sr as u32);

        let intervals = detect_onset_intervals(&w, 40.0, 0.3, &config);
        assert_eq!(intervals.len(), 2);
        assert!(intervals[0].0 < 0.05);
        assert!((intervals[1].0 - 1.5).abs() < 0.05);

        // A shorter silence than the minimum keeps one interval
        let merged = detect_onset_intervals(&w, 40.0, 2.0, &config);
        assert_eq!(merged.len(), 1);
    }
}
