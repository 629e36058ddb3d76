//! tabforge CLI entry point.
//!
//! Commands:
//! - `init` initializes a config file
//! - `run` runs the full pipeline over a CSV dataset

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "tabforge",
    about = "LLM-driven tabular ML pipeline: clean, engineer features, train",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Where to write the config
        #[arg(long, default_value = "tabforge.toml")]
        path: PathBuf,
    },

    /// Run the full pipeline over a CSV dataset
    Run {
        /// The raw input CSV
        input: PathBuf,

        /// Config file to load
        #[arg(short, long, default_value = "tabforge.toml")]
        config: PathBuf,

        /// Override the data directory for intermediate files and reports
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Override the model
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init { path } => commands::init::run(&path)?,
        Commands::Run {
            input,
            config,
            output_dir,
            model,
        } => commands::run::run(&input, &config, output_dir, model).await?,
    }

    Ok(())
}
