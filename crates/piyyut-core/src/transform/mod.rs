//! Short-time Fourier transform
//!
//! Frames are centred: frame `t` covers samples around `t * hop`, with zero
//! padding at both ends, so frame indices convert directly to time.

use anyhow::Result;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// Magnitude spectrogram
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Magnitude values [time_frame][frequency_bin]
    pub magnitudes: Vec<Vec<f32>>,
    pub num_frames: usize,
    /// `fft_size / 2 + 1`
    pub num_bins: usize,
    pub sample_rate: u32,
    pub fft_size: usize,
    pub hop: usize,
}

impl Spectrogram {
    /// Centre frequency of an FFT bin in Hz
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.fft_size as f32
    }

    pub fn frame_time(&self, frame: usize) -> f32 {
        (frame * self.hop) as f32 / self.sample_rate as f32
    }
}

/// Compute a Hann-windowed magnitude STFT
pub fn compute_stft(
    samples: &[f32],
    sample_rate: u32,
    fft_size: usize,
    hop_size: usize,
) -> Result<Spectrogram> {
    if fft_size == 0 || hop_size == 0 {
        anyhow::bail!("STFT frame and hop sizes must be > 0");
    }
    if sample_rate == 0 {
        anyhow::bail!("STFT sample rate must be > 0");
    }

    let num_bins = fft_size / 2 + 1;
    let num_frames = if samples.is_empty() {
        0
    } else {
        1 + samples.len() / hop_size
    };

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    let window = create_hann_window(fft_size);
    let half = (fft_size / 2) as isize;

    let mut magnitudes = Vec::with_capacity(num_frames);
    let mut frame = vec![Complex::new(0.0f32, 0.0); fft_size];

    for frame_idx in 0..num_frames {
        let start = (frame_idx * hop_size) as isize - half;
        for (i, slot) in frame.iter_mut().enumerate() {
            let pos = start + i as isize;
            let s = if pos >= 0 && (pos as usize) < samples.len() {
                samples[pos as usize]
            } else {
                0.0
            };
            *slot = Complex::new(s * window[i], 0.0);
        }

        fft.process(&mut frame);
        magnitudes.push(frame[..num_bins].iter().map(|c| c.norm()).collect());
    }

    Ok(Spectrogram {
        magnitudes,
        num_frames,
        num_bins,
        sample_rate,
        fft_size,
        hop: hop_size,
    })
}

/// Create Hann window
pub(crate) fn create_hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            let x = i as f32 / (size - 1) as f32;
            0.5 * (1.0 - (2.0 * PI * x).cos())
        })
        .collect()
}
