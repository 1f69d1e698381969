//! JSON output formatting

use piyyut_core::{AnalysisResult, RecordingMetadata, StoredAnalysis};
use serde::Serialize;

#[derive(Serialize)]
struct HistoryOutput<'a> {
    user_id: &'a str,
    count: usize,
    recordings: &'a [RecordingMetadata],
}

#[derive(Serialize)]
struct AnalysesOutput<'a> {
    recording_id: &'a str,
    count: usize,
    analyses: &'a [StoredAnalysis],
}

#[derive(Serialize)]
struct ScoreOutput<'a> {
    candidate: &'a str,
    reference: &'a str,
    #[serde(flatten)]
    result: &'a AnalysisResult,
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output: {}", e),
    }
}

pub fn print_score(candidate: &str, reference: &str, result: &AnalysisResult) {
    print_json(&ScoreOutput {
        candidate,
        reference,
        result,
    });
}

/// Print a user's recordings, newest first, with a count
pub fn print_history(user_id: &str, recordings: &[RecordingMetadata]) {
    print_json(&HistoryOutput {
        user_id,
        count: recordings.len(),
        recordings,
    });
}

pub fn print_analyses(recording_id: &str, analyses: &[StoredAnalysis]) {
    print_json(&AnalysesOutput {
        recording_id,
        count: analyses.len(),
        analyses,
    });
}
