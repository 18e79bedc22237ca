mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "outreachd")]
#[command(about = "Outreach automation agent daemon", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent daemon
    Run,

    /// Resume a healed job from a checkpoint file
    Resume {
        /// Path to the heal-state checkpoint
        state_file: PathBuf,
    },

    /// Show current configuration status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run => {
            commands::run::run().await?;
        }
        Commands::Resume { state_file } => {
            commands::resume::run(state_file).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
    }

    Ok(())
}
