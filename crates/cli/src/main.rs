//! Warden CLI entry point.
//!
//! Commands:
//! - `daemon`: Run the scheduler with the curation passes until Ctrl-C
//! - `sweep`:  Run one curation pass now and print what it changed
//! - `status`: Show tier counts, tier budgets and registered passes
//! - `budget`: Show the spending ledger's effective settings

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "warden",
    about = "Warden: scheduler, spending ledger and memory curation",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.warden/config.toml)
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and curation passes until interrupted
    Daemon,

    /// Run a single curation pass
    Sweep {
        /// rapid, standard, hourly or deep
        pass: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show store and curation status
    Status,

    /// Show spending ledger settings and per-owner ceilings
    Budget {
        /// Show the ceiling for this owner only
        #[arg(short, long)]
        owner: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;

    // RUST_LOG wins, then --verbose, then the configured level
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Daemon => commands::daemon::run(config).await?,
        Commands::Sweep { pass, json } => commands::sweep::run(config, &pass, json).await?,
        Commands::Status => commands::status::run(config).await?,
        Commands::Budget { owner } => commands::budget::run(config, owner.as_deref())?,
    }

    Ok(())
}
