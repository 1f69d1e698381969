//! Chroma, MFCC and spectral contrast

use super::mono_samples;
use crate::audio::Waveform;
use crate::config::AnalysisConfig;
use crate::transform::{compute_stft, Spectrogram};
use anyhow::Result;
use serde::{Deserialize, Serialize};

const A4_FREQ: f32 = 440.0;
const CHROMA_FMIN: f32 = 32.7;
const CHROMA_FMAX: f32 = 5000.0;

/// Per-frame spectral descriptors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralDescriptors {
    /// Pitch-class energy per frame, max-normalized
    pub chroma: Vec<[f32; 12]>,
    /// MFCCs per frame
    pub timbre: Vec<Vec<f32>>,
    /// Peak-to-valley contrast per octave band per frame
    pub spectral_contrast: Vec<Vec<f32>>,
}

impl SpectralDescriptors {
    pub fn chroma_profile(&self) -> [f32; 12] {
        let mut profile = [0.0f32; 12];
        if self.chroma.is_empty() {
            return profile;
        }
        for frame in &self.chroma {
            for (p, &v) in profile.iter_mut().zip(frame) {
                *p += v;
            }
        }
        let n = self.chroma.len() as f32;
        profile.iter_mut().for_each(|p| *p /= n);
        profile
    }

    pub fn timbre_profile(&self) -> Vec<f32> {
        column_means(&self.timbre)
    }

    pub fn contrast_profile(&self) -> Vec<f32> {
        column_means(&self.spectral_contrast)
    }

    /// Mean contrast over all bands and frames
    pub fn contrast_mean(&self) -> f32 {
        let profile = self.contrast_profile();
        if profile.is_empty() {
            return 0.0;
        }
        profile.iter().sum::<f32>() / profile.len() as f32
    }
}

fn column_means(rows: &[Vec<f32>]) -> Vec<f32> {
    let width = match rows.first() {
        Some(row) => row.len(),
        None => return Vec::new(),
    };
    let mut means = vec![0.0f32; width];
    for row in rows {
        for (m, &v) in means.iter_mut().zip(row) {
            *m += v;
        }
    }
    means.iter_mut().for_each(|m| *m /= rows.len() as f32);
    means
}

pub fn spectral_descriptors(
    waveform: &Waveform,
    config: &AnalysisConfig,
) -> Result<SpectralDescriptors> {
    let samples = mono_samples(waveform);
    let spec = compute_stft(&samples, waveform.sample_rate, config.frame_size, config.hop_size)?;

    let chroma = chroma(&spec);
    let mel_bank = mel_filterbank(config.n_mels, &spec);
    let timbre = spec
        .magnitudes
        .iter()
        .map(|frame| mfcc(frame, &mel_bank, config.n_mfcc))
        .collect();
    let bands = contrast_bands(&spec, config.n_contrast_bands, config.contrast_fmin);
    let spectral_contrast = spec
        .magnitudes
        .iter()
        .map(|frame| contrast(frame, &bands))
        .collect();

    Ok(SpectralDescriptors {
        chroma,
        timbre,
        spectral_contrast,
    })
}

fn pitch_class(freq: f32) -> usize {
    let midi = 69.0 + 12.0 * (freq / A4_FREQ).log2();
    (midi.round() as i32).rem_euclid(12) as usize
}

fn chroma(spec: &Spectrogram) -> Vec<[f32; 12]> {
    let classes: Vec<Option<usize>> = (0..spec.num_bins)
        .map(|k| {
            let freq = spec.bin_frequency(k);
            (CHROMA_FMIN..CHROMA_FMAX)
                .contains(&freq)
                .then(|| pitch_class(freq))
        })
        .collect();

    spec.magnitudes
        .iter()
        .map(|frame| {
            let mut chroma = [0.0f32; 12];
            for (&m, class) in frame.iter().zip(&classes) {
                if let Some(c) = class {
                    chroma[*c] += m * m;
                }
            }
            let max = chroma.iter().cloned().fold(0.0f32, f32::max);
            if max > 0.0 {
                chroma.iter_mut().for_each(|c| *c /= max);
            }
            chroma
        })
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters evenly spaced on the mel scale, 0 Hz to Nyquist
fn mel_filterbank(n_mels: usize, spec: &Spectrogram) -> Vec<Vec<f32>> {
    let nyquist = spec.sample_rate as f32 / 2.0;
    let mel_max = hz_to_mel(nyquist);
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, mid, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            (0..spec.num_bins)
                .map(|k| {
                    let f = spec.bin_frequency(k);
                    if f <= lo || f >= hi {
                        0.0
                    } else if f <= mid {
                        (f - lo) / (mid - lo)
                    } else {
                        (hi - f) / (hi - mid)
                    }
                })
                .collect()
        })
        .collect()
}

/// Log mel energies followed by an orthonormal DCT-II
fn mfcc(frame: &[f32], bank: &[Vec<f32>], n_mfcc: usize) -> Vec<f32> {
    let log_mel: Vec<f32> = bank
        .iter()
        .map(|filter| {
            let energy: f32 = filter.iter().zip(frame).map(|(&w, &m)| w * m * m).sum();
            10.0 * energy.max(1e-10).log10()
        })
        .collect();

    let n = log_mel.len() as f32;
    (0..n_mfcc)
        .map(|k| {
            let sum: f32 = log_mel
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    x * (std::f32::consts::PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n)).cos()
                })
                .sum();
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            sum * scale
        })
        .collect()
}

/// Bin ranges `[lo, hi)` for the sub-`fmin` band and `n_bands` octaves above it
fn contrast_bands(spec: &Spectrogram, n_bands: usize, fmin: f32) -> Vec<(usize, usize)> {
    let bin_of = |freq: f32| {
        ((freq * spec.fft_size as f32 / spec.sample_rate as f32).round() as usize).min(spec.num_bins)
    };

    let mut edges = vec![0usize];
    for i in 0..=n_bands {
        edges.push(bin_of(fmin * 2f32.powi(i as i32)));
    }
    if let Some(last) = edges.last_mut() {
        *last = spec.num_bins;
    }

    edges
        .windows(2)
        .map(|w| (w[0], w[1].max(w[0] + 1).min(spec.num_bins)))
        .collect()
}

fn contrast(frame: &[f32], bands: &[(usize, usize)]) -> Vec<f32> {
    const QUANTILE: f32 = 0.02;
    bands
        .iter()
        .map(|&(lo, hi)| {
            if lo >= hi {
                return 0.0;
            }
            let mut band: Vec<f32> = frame[lo..hi].to_vec();
            band.sort_by(|a, b| a.total_cmp(b));
            let k = ((QUANTILE * band.len() as f32).round() as usize).max(1);
            let valley = band[..k].iter().sum::<f32>() / k as f32;
            let peak = band[band.len() - k..].iter().sum::<f32>() / k as f32;
            20.0 * ((peak + 1e-10) / (valley + 1e-10)).log10()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32) -> Waveform {
        Waveform::mono(
            (0..22050)
                .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / 44100.0).sin())
                .collect(),
            44100,
        )
    }

    #[test]
    fn test_descriptor_shapes() {
        let config = AnalysisConfig::default();
        let d = spectral_descriptors(&tone(440.0), &config).unwrap();
        let frames = 1 + 22050 / config.hop_size;

        assert_eq!(d.chroma.len(), frames);
        assert_eq!(d.timbre.len(), frames);
        assert!(d.timbre.iter().all(|f| f.len() == 13));
        assert!(d.spectral_contrast.iter().all(|f| f.len() == 7));
        assert_eq!(d.timbre_profile().len(), 13);
    }

    #[test]
    fn test_chroma_of_a_is_class_9() {
        let config = AnalysisConfig::default();
        let profile = spectral_descriptors(&tone(440.0), &config)
            .unwrap()
            .chroma_profile();
        let argmax = profile
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(argmax, 9);
    }

    #[test]
    fn test_tone_has_more_contrast_than_noise() {
        let config = AnalysisConfig::default();
        let mut state = 12345u32;
        let noise = Waveform::mono(
            (0..22050)
                .map(|_| {
                    state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
                })
                .collect(),
            44100,
        );
        let tonal = spectral_descriptors(&tone(1000.0), &config).unwrap();
        let noisy = spectral_descriptors(&noise, &config).unwrap();
        assert!(tonal.contrast_mean() > noisy.contrast_mean());
    }
}
