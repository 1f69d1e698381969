use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved recording as stored in the `recordings` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingRow {
    pub id: String,
    pub user_id: String,
    pub reference_id: String,
    pub duration: f64,
    pub sample_rate: i32,
    pub channels: i16,
    pub created_at: DateTime<Utc>,
    pub storage_path: String,
    pub scores: Option<serde_json::Value>,
}

/// Input structure for inserting a recording row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecording {
    pub id: String,
    pub user_id: String,
    pub reference_id: String,
    pub duration: f64,
    pub sample_rate: i32,
    pub channels: i16,
    pub created_at: DateTime<Utc>,
    pub storage_path: String,
}

/// One comparison attempt as stored in the `analysis_results` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRow {
    pub id: i64,
    pub recording_id: String,
    pub reference_id: String,
    pub pitch_accuracy: f64,
    pub rhythm_accuracy: f64,
    pub timing_offset: f64,
    pub confidence: f64,
    pub detailed_scores: serde_json::Value,
    pub analyzed_at: DateTime<Utc>,
}

/// Input structure for appending an analysis row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnalysis {
    pub recording_id: String,
    pub reference_id: String,
    pub pitch_accuracy: f64,
    pub rhythm_accuracy: f64,
    pub timing_offset: f64,
    pub confidence: f64,
    pub detailed_scores: serde_json::Value,
    pub analyzed_at: DateTime<Utc>,
}
