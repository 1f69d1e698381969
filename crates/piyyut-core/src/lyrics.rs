//! Word-level lyric timing for karaoke-style display

use crate::audio::Waveform;
use crate::config::AnalysisConfig;
use crate::error::RecordingError;
use crate::features::{detect_onset_intervals, detect_onsets, mono_samples};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LyricTiming {
    pub word: String,
    pub start_time: f32,
    pub end_time: f32,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

/// Energy times amplitude stability of a segment, clamped to [0, 1]
fn segment_confidence(segment: &[f32]) -> f32 {
    if segment.is_empty() {
        return 0.0;
    }
    let n = segment.len() as f32;
    let energy = segment.iter().map(|&s| s * s).sum::<f32>() / n;
    let mean_abs = segment.iter().map(|s| s.abs()).sum::<f32>() / n;
    if mean_abs <= 0.0 {
        return 0.0;
    }
    let mean = segment.iter().sum::<f32>() / n;
    let std = (segment.iter().map(|&s| (s - mean).powi(2)).sum::<f32>() / n).sqrt();
    let stability = 1.0 - std / mean_abs;
    (energy * stability).clamp(0.0, 1.0)
}

/// Pair the i-th word with the i-th non-silent interval
///
/// Extra words or extra intervals are left unmatched.
pub fn align_words_to_intervals(
    waveform: &Waveform,
    text: &str,
    threshold_db: f32,
    min_silence_secs: f32,
    config: &AnalysisConfig,
) -> Vec<LyricTiming> {
    let samples = mono_samples(waveform);
    let sr = waveform.sample_rate as f32;
    let intervals = detect_onset_intervals(waveform, threshold_db, min_silence_secs, config);

    text.split_whitespace()
        .zip(intervals)
        .map(|(word, (start, end))| {
            let lo = ((start * sr) as usize).min(samples.len());
            let hi = ((end * sr) as usize).clamp(lo, samples.len());
            LyricTiming {
                word: word.to_string(),
                start_time: start,
                end_time: end,
                confidence: segment_confidence(&samples[lo..hi]),
            }
        })
        .collect()
}

/// Word i spans onset i to onset i + 1; words past the last onset pair are dropped
pub fn align_words_to_onsets(
    waveform: &Waveform,
    text: &str,
    config: &AnalysisConfig,
) -> crate::Result<Vec<LyricTiming>> {
    let onsets = detect_onsets(waveform, config).map_err(|e| RecordingError::Analysis(format!("{:#}", e)))?;
    Ok(text
        .split_whitespace()
        .zip(onsets.windows(2))
        .map(|(word, pair)| LyricTiming {
            word: word.to_string(),
            start_time: pair[0],
            end_time: pair[1],
            confidence: 1.0,
        })
        .collect())
}

/// Ordered word timings for one recording
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LyricTrack {
    words: Vec<LyricTiming>,
}

impl LyricTrack {
    pub fn new(words: Vec<LyricTiming>) -> Self {
        Self { words }
    }

    pub fn words(&self) -> &[LyricTiming] {
        &self.words
    }

    /// The first word whose span contains `time`
    pub fn word_at(&self, time: f32) -> Option<&str> {
        self.words
            .iter()
            .find(|w| w.start_time <= time && time <= w.end_time)
            .map(|w| w.word.as_str())
    }

    /// Manually retime a word; false if the index is out of range or the span is inverted
    pub fn adjust(&mut self, index: usize, start_time: f32, end_time: f32) -> bool {
        if start_time > end_time {
            return false;
        }
        match self.words.get_mut(index) {
            Some(word) => {
                word.start_time = start_time;
                word.end_time = end_time;
                true
            }
            None => false,
        }
    }

    pub fn export_json(&self, path: &Path) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(&self.words)
            .context("Failed to serialize lyric timing")
            .map_err(RecordingError::io)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))
            .map_err(RecordingError::io)
    }

    pub fn import_json(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .map_err(RecordingError::io)?;
        let words: Vec<LyricTiming> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid lyric timing file {}", path.display()))
            .map_err(RecordingError::io)?;
        Ok(Self { words })
    }
}
