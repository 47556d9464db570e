//! Pixl CLI - developer tool for the playback core
//!
//! Features:
//! - Cue document parsing and scrub-preview lookup
//! - Level ladder inspection through the bundled HLS engine
//! - Gesture table listing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Pixl CLI - playback core toolkit
#[derive(Parser)]
#[command(name = "pixl-cli")]
#[command(version)]
#[command(about = "Inspect cue documents, stream levels and player key bindings", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a sprite cue document
    Cues {
        /// Path to the cue document
        file: PathBuf,

        /// Look up the cue covering this time (seconds)
        #[arg(long)]
        at: Option<f64>,
    },

    /// Load a manifest and list its quality levels
    Levels {
        /// URL of the master playlist
        manifest: String,

        /// Give up after this many seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Show the keyboard bindings
    Keys,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .init();

    pixl_player_core::init();

    match cli.command {
        Commands::Cues { file, at } => {
            commands::cues(&file, at, &cli.format).await?;
        }
        Commands::Levels { manifest, timeout } => {
            commands::levels(&manifest, timeout, &cli.format).await?;
        }
        Commands::Keys => {
            commands::keys(&cli.format)?;
        }
    }

    Ok(())
}
