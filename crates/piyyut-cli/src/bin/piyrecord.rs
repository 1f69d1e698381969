//! piyrecord - Record a take, save it and optionally score it
//!
//! Usage:
//!   piyrecord --user <id> --track <id> --seconds 10 [--reference <recording_id>]
//!   piyrecord --replay take.wav --user <id> --track <id>    # Feed a file as the microphone

use anyhow::Result;
use clap::Parser;
use piyyut_cli::{init_logging, output::print_json};
use piyyut_core::audio::{InputDevice, ReplayInput, SignalIngestion};
use piyyut_core::{PiyyutConfig, RecordingSession, ScoringEngine, SessionState};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "piyrecord")]
#[command(about = "Record a practice take and compare it with a reference", long_about = None)]
struct Args {
    /// Owner of the recording
    #[arg(short, long)]
    user: String,

    /// Reference track being practised
    #[arg(short, long)]
    track: String,

    /// Stored reference recording to score against
    #[arg(short, long)]
    reference: Option<String>,

    /// Recording length in seconds
    #[arg(short, long, default_value_t = 10.0)]
    seconds: f64,

    /// Use an audio file as the input device
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Path to configuration file (TOML); defaults apply if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct RecordOutput {
    recording_id: String,
    duration: f64,
    state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<piyyut_core::AnalysisResult>,
}

fn open_device(args: &Args, chunk_frames: usize) -> Result<Box<dyn InputDevice>> {
    if let Some(path) = &args.replay {
        return Ok(Box::new(ReplayInput::from_file(path, chunk_frames)?));
    }
    microphone()
}

#[cfg(feature = "cpal")]
fn microphone() -> Result<Box<dyn InputDevice>> {
    Ok(Box::new(piyyut_core::audio::CpalInput::default_device()?))
}

#[cfg(not(feature = "cpal"))]
fn microphone() -> Result<Box<dyn InputDevice>> {
    anyhow::bail!("Built without microphone support; rebuild with --features cpal or use --replay")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = PiyyutConfig::load_or_default(args.config.as_deref())?;
    let store = Arc::new(config.open_store().await?);
    let engine = Arc::new(ScoringEngine::new(config.analysis.clone())?);

    let device = open_device(&args, config.capture.chunk_frames)?;
    let ingestion = SignalIngestion::new(device, config.capture.clone(), config.analysis.sample_rate);
    let mut session = RecordingSession::new(ingestion, store, engine);

    if !session.start_recording() {
        let reason = session
            .last_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!("Could not start recording: {}", reason);
    }

    eprintln!("Recording for {:.1}s...", args.seconds);
    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds.max(0.0));
    while Instant::now() < deadline {
        if session.poll_device() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let waveform = match session.stop_recording() {
        Some(waveform) => waveform,
        None => {
            if let Some(partial) = session.take_recovered() {
                log::warn!(
                    "Device failed; {:.2}s of audio recovered but not saved",
                    partial.duration_secs()
                );
            }
            match session.last_error() {
                Some(e) => anyhow::bail!("Recording failed: {}", e),
                None => anyhow::bail!("Recording captured no audio"),
            }
        }
    };

    let recording_id = session.save_recording(&args.user, &args.track).await?;

    let analysis = match &args.reference {
        Some(reference_id) => Some(
            session
                .compare_with_reference(&recording_id, reference_id)
                .await?,
        ),
        None => None,
    };

    print_json(&RecordOutput {
        recording_id,
        duration: waveform.duration_secs(),
        state: session.state(),
        analysis,
    });
    Ok(())
}
