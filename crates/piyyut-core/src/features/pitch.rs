//! Fundamental frequency tracking with YIN
//!
//! A. de Cheveigné and H. Kawahara, "YIN, a fundamental frequency estimator
//! for speech and music", 2002. The difference function is computed from an
//! FFT cross-correlation and prefix sums of squared samples.

use super::mono_samples;
use crate::audio::Waveform;
use crate::config::AnalysisConfig;
use anyhow::Result;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Frame-wise pitch estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchTrack {
    /// Fundamental frequency per frame in Hz, 0 when unvoiced
    pub f0: Vec<f32>,
    pub voiced: Vec<bool>,
    pub hop: usize,
    pub sample_rate: u32,
}

impl PitchTrack {
    pub fn voiced_f0(&self) -> Vec<f32> {
        self.f0
            .iter()
            .zip(&self.voiced)
            .filter(|(_, &v)| v)
            .map(|(&f, _)| f)
            .collect()
    }

    pub fn voiced_count(&self) -> usize {
        self.voiced.iter().filter(|&&v| v).count()
    }

    pub fn frame_time(&self, frame: usize) -> f32 {
        (frame * self.hop) as f32 / self.sample_rate as f32
    }
}

struct Yin {
    frame_size: usize,
    window: usize,
    min_tau: usize,
    max_tau: usize,
    threshold: f32,
    rms_floor: f32,
    sample_rate: f32,
    fmin: f32,
    fmax: f32,
    fft_size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Yin {
    fn new(sample_rate: u32, fmin: f32, fmax: f32, config: &AnalysisConfig) -> Result<Self> {
        if fmin <= 0.0 || fmin >= fmax {
            anyhow::bail!("Invalid pitch range {}..{}Hz", fmin, fmax);
        }
        let sr = sample_rate as f32;
        let frame_size = config.frame_size;
        let max_tau = ((sr / fmin).ceil() as usize).min(frame_size / 2);
        let min_tau = ((sr / fmax).floor() as usize).max(2);
        if min_tau >= max_tau {
            anyhow::bail!(
                "Frame size {} too small for pitch range {}..{}Hz",
                frame_size,
                fmin,
                fmax
            );
        }

        let window = frame_size - max_tau;
        let fft_size = (frame_size + window).next_power_of_two();
        let mut planner = FftPlanner::new();

        Ok(Self {
            frame_size,
            window,
            min_tau,
            max_tau,
            threshold: config.yin_threshold,
            rms_floor: config.voicing_rms_floor,
            sample_rate: sr,
            fmin,
            fmax,
            fft_size,
            forward: planner.plan_fft_forward(fft_size),
            inverse: planner.plan_fft_inverse(fft_size),
        })
    }

    /// Squared-difference function d(tau) for tau in 0..=max_tau
    fn difference(&self, frame: &[f32]) -> Vec<f32> {
        let n = self.fft_size;
        let w = self.window;

        let mut head: Vec<Complex<f32>> = frame[..w]
            .iter()
            .map(|&s| Complex::new(s, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(n)
            .collect();
        let mut full: Vec<Complex<f32>> = frame
            .iter()
            .map(|&s| Complex::new(s, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(n)
            .collect();

        self.forward.process(&mut head);
        self.forward.process(&mut full);
        let mut xcorr: Vec<Complex<f32>> =
            head.iter().zip(&full).map(|(a, b)| a.conj() * b).collect();
        self.inverse.process(&mut xcorr);

        let mut prefix = Vec::with_capacity(frame.len() + 1);
        prefix.push(0.0f64);
        for &s in frame {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + (s as f64) * (s as f64));
        }
        let energy = |start: usize| (prefix[start + w] - prefix[start]) as f32;

        let e0 = energy(0);
        (0..=self.max_tau)
            .map(|tau| {
                let r = xcorr[tau].re / n as f32;
                (e0 + energy(tau) - 2.0 * r).max(0.0)
            })
            .collect()
    }

    fn estimate(&self, frame: &[f32]) -> Option<f32> {
        let rms = (frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
        if rms < self.rms_floor {
            return None;
        }

        let diff = self.difference(frame);

        // Cumulative mean normalized difference
        let mut cmnd = vec![1.0f32; diff.len()];
        let mut running = 0.0f32;
        for tau in 1..diff.len() {
            running += diff[tau];
            cmnd[tau] = if running > 0.0 {
                diff[tau] * tau as f32 / running
            } else {
                1.0
            };
        }

        let mut tau = self.min_tau;
        let found = loop {
            if tau > self.max_tau {
                break None;
            }
            if cmnd[tau] < self.threshold {
                while tau < self.max_tau && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                break Some(tau);
            }
            tau += 1;
        }?;

        // Parabolic interpolation
        let refined = if found > 0 && found < self.max_tau {
            let a = cmnd[found - 1];
            let b = cmnd[found];
            let c = cmnd[found + 1];
            let denom = a - 2.0 * b + c;
            if denom.abs() > 1e-12 {
                found as f32 + 0.5 * (a - c) / denom
            } else {
                found as f32
            }
        } else {
            found as f32
        };

        let f0 = self.sample_rate / refined;
        if f0 < self.fmin || f0 > self.fmax {
            log::trace!("Rejecting out-of-range pitch {:.1}Hz", f0);
            return None;
        }
        Some(f0)
    }
}

/// Track the fundamental frequency of a waveform between `fmin` and `fmax` Hz
///
/// Frames are centred on multiples of the hop size, matching the STFT.
pub fn extract_pitch_track(
    waveform: &Waveform,
    fmin: f32,
    fmax: f32,
    config: &AnalysisConfig,
) -> Result<PitchTrack> {
    let samples = mono_samples(waveform);
    let yin = Yin::new(waveform.sample_rate, fmin, fmax, config)?;
    let hop = config.hop_size;

    let num_frames = if samples.is_empty() {
        0
    } else {
        1 + samples.len() / hop
    };
    let half = (yin.frame_size / 2) as isize;

    let estimates: Vec<Option<f32>> = (0..num_frames)
        .into_par_iter()
        .map(|t| {
            let start = (t * hop) as isize - half;
            let frame: Vec<f32> = (0..yin.frame_size as isize)
                .map(|i| {
                    let pos = start + i;
                    if pos >= 0 && (pos as usize) < samples.len() {
                        samples[pos as usize]
                    } else {
                        0.0
                    }
                })
                .collect();
            yin.estimate(&frame)
        })
        .collect();

    let voiced: Vec<bool> = estimates.iter().map(|e| e.is_some()).collect();
    let f0: Vec<f32> = estimates.iter().map(|e| e.unwrap_or(0.0)).collect();

    log::debug!(
        "Pitch track: {} frames, {} voiced",
        f0.len(),
        voiced.iter().filter(|&&v| v).count()
    );

    Ok(PitchTrack {
        f0,
        voiced,
        hop,
        sample_rate: waveform.sample_rate,
    })
}
