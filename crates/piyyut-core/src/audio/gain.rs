//! Loudness measurement and normalization

use super::Waveform;

const SILENCE_FLOOR: f32 = 1e-10;

/// RMS level in dBFS; silence reports `f32::NEG_INFINITY`
pub fn rms_dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let mean_sq = samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>()
        / samples.len() as f64;
    let rms = mean_sq.sqrt() as f32;
    if rms < SILENCE_FLOOR {
        f32::NEG_INFINITY
    } else {
        20.0 * rms.log10()
    }
}

/// Scale a waveform so that its RMS level hits `target_db` dBFS
///
/// Silent input is returned unchanged. The result is clipped to [-1, 1].
pub fn normalize_loudness(waveform: &Waveform, target_db: f32) -> Waveform {
    let current = rms_dbfs(&waveform.samples);
    if !current.is_finite() {
        return waveform.clone();
    }

    let gain = 10f32.powf((target_db - current) / 20.0);
    log::debug!("Normalizing {:.1}dBFS -> {:.1}dBFS (gain {:.3})", current, target_db, gain);

    let samples = waveform
        .samples
        .iter()
        .map(|&s| (s * gain).clamp(-1.0, 1.0))
        .collect();
    Waveform::new(samples, waveform.sample_rate, waveform.channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_full_scale_square_is_zero_db() {
        let samples = vec![1.0, -1.0, 1.0, -1.0];
        assert_abs_diff_eq!(rms_dbfs(&samples), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_normalize_hits_target() {
        let quiet = Waveform::mono(vec![0.01, -0.01, 0.01, -0.01], 44100);
        let louder = normalize_loudness(&quiet, -20.0);
        assert_abs_diff_eq!(rms_dbfs(&louder.samples), -20.0, epsilon = 1e-3);
    }

    #[test]
    fn test_silence_is_untouched() {
        let silent = Waveform::mono(vec![0.0; 16], 44100);
        assert_eq!(normalize_loudness(&silent, -20.0), silent);
        assert_eq!(rms_dbfs(&silent.samples), f32::NEG_INFINITY);
    }
}
