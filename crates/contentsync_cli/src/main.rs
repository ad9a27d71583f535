//! contentsync CLI
//!
//! Maintenance tools for an on-disk contentsync client cache.
//!
//! # Commands
//!
//! - `status` - Show the local version pointer and cache counts
//! - `items` - List cached items
//! - `verify` - Re-hash cached assets and report corruption
//! - `reset` - Forget the version pointer so the next run is a full resync

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// contentsync cache maintenance tools.
#[derive(Parser)]
#[command(name = "contentsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cache directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the local version pointer and cache counts
    Status,

    /// List cached items
    Items {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Re-hash cached assets and report corruption
    Verify,

    /// Forget the version pointer so the next sync is a full resync
    Reset,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Status => {
            let path = cli.path.ok_or("Cache path required for status")?;
            commands::status::run(&path)?;
        }
        Commands::Items { format } => {
            let path = cli.path.ok_or("Cache path required for items")?;
            commands::items::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Cache path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Reset => {
            let path = cli.path.ok_or("Cache path required for reset")?;
            commands::reset::run(&path)?;
        }
        Commands::Version => {
            println!("contentsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "limits: {} checksum entries per delta, {} paths per signing batch",
                contentsync_protocol::MAX_CHECKSUM_ENTRIES,
                contentsync_protocol::MAX_SIGN_BATCH
            );
        }
    }

    Ok(())
}
