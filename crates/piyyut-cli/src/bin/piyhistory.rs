//! piyhistory - Show practice history
//!
//! Usage:
//!   piyhistory <user_id> [--limit N]            # Recent recordings of a user
//!   piyhistory --analyses <recording_id>        # Comparisons of one recording

use anyhow::Result;
use clap::Parser;
use piyyut_cli::{
    init_logging,
    output::{print_analyses, print_history},
};
use piyyut_core::PiyyutConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "piyhistory")]
#[command(about = "List recordings and their analyses", long_about = None)]
struct Args {
    /// User id, or recording id with --analyses
    id: String,

    /// List the analyses of a recording instead of a user's recordings
    #[arg(short, long)]
    analyses: bool,

    /// Only analyses against this reference recording
    #[arg(short, long, requires = "analyses")]
    reference: Option<String>,

    /// Maximum number of recordings
    #[arg(short, long, default_value_t = 20)]
    limit: usize,

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
    let store = config.open_store().await?;

    if args.analyses {
        let analyses = store.analyses(&args.id, args.reference.as_deref()).await?;
        print_analyses(&args.id, &analyses);
    } else {
        let recordings = store.list_by_user(&args.id, args.limit).await?;
        print_history(&args.id, &recordings);
    }

    Ok(())
}
