mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use crossmatch::config::CrossmatchConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "crossmatch",
    version,
    about = "Find the same story across Pikabu, Habr and Telegram"
)]
struct Cli {
    /// Config file (defaults to ~/.crossmatch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Match posts across sources and write the results
    Run(cli::run::RunArgs),
    /// Check configuration and model files
    Doctor,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.crossmatch/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CrossmatchConfig::load_from(path)?,
        None => CrossmatchConfig::load()?,
    };

    // Log to stderr so stdout stays clean for the summary report.
    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run(args) => cli::run::run(config, args).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}
