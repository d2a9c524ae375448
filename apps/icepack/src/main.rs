//! icepack command-line entry point.
//!
//! - `icepack upload <FILE>` - upload a file as a multipart archive
//! - `icepack hash <FILE>` - print the tree hash of a file
//! - `icepack plan <SIZE_BYTES>` - show the part plan for an archive size

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Multipart archive uploads with tree-hash verification.
#[derive(Parser)]
#[command(name = "icepack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.config/icepack/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file to the vault and print the receipt as JSON.
    Upload(app::UploadArgs),

    /// Print the tree hash of a file.
    Hash(app::HashArgs),

    /// Print the part size and part count for an archive size.
    Plan(app::PlanArgs),
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean for JSON output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Upload(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(app::upload(args, config))
        }
        Commands::Hash(args) => app::hash(args),
        Commands::Plan(args) => app::plan(args, &config),
    }
}
