//! rangepull CLI - concurrent range-chunked downloader
//!
//! Splits a download into byte ranges, fetches them in parallel and
//! stitches them back together.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rangepull_core::Storage;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// rangepull - Concurrent ranged downloader
#[derive(Parser)]
#[command(name = "rangepull")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for rangepull settings
    #[arg(long, env = "RANGEPULL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose logging on stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL using concurrent range requests
    Get(GetArgs),

    /// Probe URLs for size and range support
    Probe {
        /// URLs to probe
        #[arg(required = true)]
        urls: Vec<String>,

        /// Write each result as JSON into this directory
        #[arg(long)]
        save_dir: Option<PathBuf>,

        /// Number of concurrent probes
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args)]
struct GetArgs {
    /// URL to download
    url: String,

    /// Output file or directory (defaults to the download directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of concurrent chunk requests
    #[arg(short, long, env = "RANGEPULL_WORKERS")]
    workers: Option<usize>,

    /// Chunk size in bytes
    #[arg(short, long)]
    chunk_size: Option<u64>,

    /// Retries of the whole download on retryable failures
    #[arg(long)]
    retries: Option<u32>,

    /// Replace an existing file without asking
    #[arg(short, long)]
    force: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "rangepull", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli
        .data_dir
        .unwrap_or_else(rangepull_core::default_data_dir);
    let storage = Storage::new(data_dir).await?;

    match cli.command {
        Commands::Get(args) => commands::get(&storage, args, cli.output).await?,

        Commands::Probe {
            urls,
            save_dir,
            workers,
        } => commands::probe_urls(&storage, urls, save_dir, workers, cli.output).await?,

        Commands::Config { action } => commands::config_action(&storage, action, cli.output).await?,

        Commands::Completions { .. } => {}
    }

    Ok(())
}
