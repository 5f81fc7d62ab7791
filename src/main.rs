//! Grove CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Live element model of .foo workspaces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workspace root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Number of file bodies to keep cached (overrides grove.toml)
    #[arg(long)]
    capacity: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the element tree of the workspace
    Tree {
        /// Show source ranges and parameters
        #[arg(short, long)]
        attributes: bool,
    },
    /// Watch the workspace and print every model delta
    Watch {
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Print the children and attributes of one file, as JSON
    Inspect {
        /// File to inspect, as <project>/<file>
        target: String,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays machine-readable.
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("grove={}", log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Grove v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Workspace root: {}", cli.root.display());

    let mut config = config::GroveConfig::load(&cli.root)?;
    if let Some(capacity) = cli.capacity {
        config.model.file_cache_capacity = capacity;
    }

    match cli.command {
        Commands::Tree { attributes } => commands::tree(&cli.root, config, attributes),
        Commands::Watch { json } => commands::watch(&cli.root, config, json).await,
        Commands::Inspect { target } => commands::inspect(&cli.root, config, &target),
        Commands::Version => {
            println!("Grove v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
