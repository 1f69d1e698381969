//! piyscore - Compare a recording against a reference
//!
//! Usage:
//!   piyscore <candidate_audio> <reference_audio>          # Files on disk
//!   piyscore --stored <recording_id> <reference_id>       # Recordings in the store

use anyhow::Result;
use clap::Parser;
use piyyut_cli::{init_logging, output::print_score};
use piyyut_core::{compare_stored, PiyyutConfig, ScoringEngine};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "piyscore")]
#[command(about = "Score a practice take against a reference performance", long_about = None)]
struct Args {
    /// Candidate audio file, or recording id with --stored
    candidate: String,

    /// Reference audio file, or recording id with --stored
    reference: String,

    /// Treat both arguments as stored recording ids and keep the result
    #[arg(short, long)]
    stored: bool,

    /// Path to configuration file (TOML); defaults apply if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = PiyyutConfig::load_or_default(args.config.as_deref())?;

    let result = if args.stored {
        let store = Arc::new(config.open_store().await?);
        let engine = Arc::new(ScoringEngine::new(config.analysis.clone())?);
        compare_stored(store, engine, &args.candidate, &args.reference).await?
    } else {
        let analysis = config.analysis.clone();
        let candidate = PathBuf::from(&args.candidate);
        let reference = PathBuf::from(&args.reference);
        tokio::task::spawn_blocking(move || {
            piyyut_core::compare_files(&candidate, &reference, &analysis)
        })
        .await??
    };

    print_score(&args.candidate, &args.reference, &result);
    Ok(())
}
