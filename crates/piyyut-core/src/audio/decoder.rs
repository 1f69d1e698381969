//! Audio decoding for multiple formats

use super::{decode_with_symphonia, resample_to_target, AudioFormat};
use crate::error::RecordingError;
use anyhow::{Context, Result};
use std::path::Path;

/// Interleaved audio samples with their rate and channel count
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Convert to mono by averaging channels
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        let mut mono = Vec::with_capacity(self.frames());
        for chunk in self.samples.chunks(self.channels as usize) {
            let avg: f32 = chunk.iter().sum::<f32>() / chunk.len() as f32;
            mono.push(avg);
        }
        mono
    }

    /// Down-mix to mono and resample to `target_rate` when needed
    pub fn into_canonical(self, target_rate: u32) -> Result<Waveform> {
        if self.sample_rate == 0 {
            anyhow::bail!("Waveform has a sample rate of 0");
        }
        if self.channels == 1 && self.sample_rate == target_rate {
            return Ok(self);
        }

        let mono = self.to_mono();
        let samples = if self.sample_rate != target_rate {
            resample_to_target(&mono, self.sample_rate, target_rate)?
        } else {
            mono
        };

        Ok(Waveform::mono(samples, target_rate))
    }
}

/// Decode an audio file without changing its rate or channel layout
pub fn read_audio(path: &Path) -> Result<Waveform> {
    if !path.exists() {
        anyhow::bail!("Audio file not found: {}", path.display());
    }

    let format = AudioFormat::from_path(path);

    let waveform = match format {
        AudioFormat::Wav => decode_wav(path)?,
        AudioFormat::Mp3 => decode_mp3(path)?,
        AudioFormat::Flac => decode_flac(path)?,
        AudioFormat::Ogg => decode_ogg(path)?,
        AudioFormat::Unknown => {
            // Let the Symphonia probe have a go before giving up
            decode_with_symphonia(path)
                .with_context(|| format!("Unsupported audio format: {}", path.display()))?
        }
        _ => decode_with_symphonia(path)?,
    };

    if waveform.is_empty() {
        anyhow::bail!("No audio samples decoded from {}", path.display());
    }
    if waveform.sample_rate == 0 {
        anyhow::bail!("Invalid sample rate in {}", path.display());
    }

    Ok(waveform)
}

/// Decode audio file to a mono waveform at the target sample rate
pub fn decode_audio(path: &Path, target_sample_rate: u32) -> Result<Waveform> {
    let waveform = read_audio(path)?;

    log::debug!(
        "Decoded {}: {} frames @ {}Hz x{}",
        path.display(),
        waveform.frames(),
        waveform.sample_rate,
        waveform.channels
    );

    waveform.into_canonical(target_sample_rate)
}

/// Signal ingestion entry point for stored files
pub fn load_waveform(path: &Path, target_sample_rate: u32) -> crate::Result<Waveform> {
    decode_audio(path, target_sample_rate).map_err(RecordingError::io)
}

/// Decode WAV file
fn decode_wav(path: &Path) -> Result<Waveform> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;

    let spec = reader.spec();

    // Read samples and convert to f32
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(Waveform::new(samples, spec.sample_rate, spec.channels))
}

/// Decode MP3 file
fn decode_mp3(path: &Path) -> Result<Waveform> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read MP3 file: {}", path.display()))?;

    let mut decoder = minimp3::Decoder::new(&data[..]);
    let mut samples = Vec::new();
    let mut sample_rate = 0;
    let mut channels = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate as u32;
                    channels = frame.channels as u16;
                }
                samples.extend(frame.data.iter().map(|&s| s as f32 / 32768.0));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => anyhow::bail!("MP3 decode error: {}", e),
        }
    }

    Ok(Waveform::new(samples, sample_rate, channels))
}

/// Decode FLAC file
fn decode_flac(path: &Path) -> Result<Waveform> {
    let mut reader = claxon::FlacReader::open(path)
        .with_context(|| format!("Failed to open FLAC file: {}", path.display()))?;

    let info = reader.streaminfo();
    let max_val = (1i64 << (info.bits_per_sample - 1)) as f32;
    let samples: Vec<f32> = reader
        .samples()
        .map(|s| s.map(|v| v as f32 / max_val))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Waveform::new(samples, info.sample_rate, info.channels as u16))
}

/// Decode OGG Vorbis file
fn decode_ogg(path: &Path) -> Result<Waveform> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open OGG file: {}", path.display()))?;

    let mut reader = lewton::inside_ogg::OggStreamReader::new(file)?;

    let sample_rate = reader.ident_hdr.audio_sample_rate;
    let channels = reader.ident_hdr.audio_channels as u16;

    let mut samples = Vec::new();
    while let Some(packet) = reader.read_dec_packet_itl()? {
        samples.extend(packet.iter().map(|&s| s as f32 / 32768.0));
    }

    Ok(Waveform::new(samples, sample_rate, channels))
}
