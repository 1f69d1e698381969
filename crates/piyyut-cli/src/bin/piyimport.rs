//! piyimport - Store an audio file as a recording
//!
//! Usage: piyimport [--config <path>] --user <id> --track <id> <audio_file>...

use anyhow::Result;
use clap::Parser;
use piyyut_cli::{init_logging, output::print_json};
use piyyut_core::PiyyutConfig;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "piyimport")]
#[command(about = "Import audio files (e.g. reference performances) into the recording store", long_about = None)]
struct Args {
    /// Audio files to import
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Owner of the imported recordings
    #[arg(short, long, default_value = "reference")]
    user: String,

    /// Reference track the recordings belong to
    #[arg(short, long)]
    track: String,

    /// Path to configuration file (TOML); defaults apply if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Imported {
    path: PathBuf,
    recording_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = PiyyutConfig::load_or_default(args.config.as_deref())?;
    let store = config.open_store().await?;

    let mut imported = Vec::with_capacity(args.inputs.len());
    for path in args.inputs {
        let recording_id = store.import_file(&path, &args.user, &args.track).await?;
        log::info!("{} -> {}", path.display(), recording_id);
        imported.push(Imported { path, recording_id });
    }

    print_json(&imported);
    Ok(())
}
