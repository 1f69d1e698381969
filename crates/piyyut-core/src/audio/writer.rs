//! WAV persistence

use super::Waveform;
use anyhow::{Context, Result};
use std::path::Path;

/// Write a waveform as 32-bit float WAV, keeping its rate and channel count
pub fn write_wav(path: &Path, waveform: &Waveform) -> Result<()> {
    let spec = hound::WavSpec {
        channels: waveform.channels,
        sample_rate: waveform.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    for &sample in &waveform.samples {
        writer.write_sample(sample)?;
    }
    writer
        .finalize()
        .with_context(|| format!("Failed to finalize WAV file: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::read_audio;

    #[test]
    fn test_float_wav_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let waveform = Waveform::mono(vec![0.0, 0.123_456_79, -0.987_654_3, 1.0e-7], 44100);

        write_wav(&path, &waveform).unwrap();
        let loaded = read_audio(&path).unwrap();

        assert_eq!(loaded, waveform);
    }

    #[test]
    fn test_write_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("take.wav");
        assert!(write_wav(&path, &Waveform::mono(vec![0.0], 44100)).is_err());
    }
}
