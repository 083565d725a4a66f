//! Filing Mirror: local mirror of a public regulatory filing registry
//!
//! Command-line entry point.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filing_mirror::config::{Config, LogFormat, CONFIG_FILE_NAME, USER_AGENT_ENV};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "filing-mirror")]
#[command(about = "Mirror registrant and filing metadata and download primary filing documents")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Caller identification sent with every request ("Org Name contact@example.com")
    #[arg(long, env = USER_AGENT_ENV)]
    user_agent: Option<String>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (no progress output)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download, extract and ingest the bulk archive of per-entity records
    Bulk {
        /// Reuse the archive already in the data directory
        #[arg(long)]
        skip_download: bool,

        /// Reuse the extracted files already in the data directory
        #[arg(long)]
        skip_extract: bool,

        /// Stop after download and extraction
        #[arg(long)]
        skip_ingest: bool,
    },

    /// Ingest per-entity files already on disk
    Ingest {
        /// Directory of extracted files (defaults to <data_dir>/submissions)
        path: Option<PathBuf>,
    },

    /// Catch up from recent daily change listings
    Incremental {
        /// Number of calendar days to look back, including today
        #[arg(long)]
        days_back: Option<u32>,
    },

    /// Backfill filings from quarterly full-index listings
    Backfill {
        /// First year, inclusive
        #[arg(long)]
        start_year: i32,

        /// Last year, inclusive
        #[arg(long)]
        end_year: i32,

        /// Form types to keep (defaults to pipeline.backfill_forms)
        #[arg(long = "form")]
        forms: Vec<String>,
    },

    /// Resolve and download primary documents of mirrored filings
    Download {
        /// First filing year, inclusive
        #[arg(long)]
        start_year: i32,

        /// Last filing year, inclusive
        #[arg(long)]
        end_year: i32,

        /// Form types to select (defaults to pipeline.target_forms)
        #[arg(long = "form")]
        forms: Vec<String>,

        /// Maximum number of filings to select
        #[arg(long)]
        limit: Option<usize>,

        /// Maximum number of documents to download, newest first
        #[arg(long)]
        max_downloads: Option<usize>,

        /// Parallel downloads
        #[arg(long)]
        concurrency: Option<usize>,

        /// Download again even when the document is already on disk
        #[arg(long)]
        overwrite: bool,
    },

    /// Show mirror statistics
    Stats {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { path } = &cli.command {
        return commands::init::init_config(path, cli.user_agent.as_deref());
    }

    // Load config, then apply command-line overrides before validating
    let mut config = if cli.config.exists() {
        Config::read(&cli.config)?
    } else {
        Config::default()
    };
    if let Some(data_dir) = cli.data_dir {
        config.pipeline.data_dir = data_dir;
    }
    if let Some(user_agent) = cli.user_agent {
        config.registry.user_agent = user_agent;
    }

    init_logging(&config, cli.verbose)?;
    config.validate()?;

    std::fs::create_dir_all(&config.pipeline.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.pipeline.data_dir.display()
        )
    })?;

    let quiet = cli.quiet;
    match cli.command {
        Commands::Bulk {
            skip_download,
            skip_extract,
            skip_ingest,
        } => commands::ingest::bulk(config, skip_download, skip_extract, skip_ingest, quiet).await,
        Commands::Ingest { path } => commands::ingest::ingest_files(config, path, quiet).await,
        Commands::Incremental { days_back } => commands::ingest::incremental(config, days_back, quiet).await,
        Commands::Backfill {
            start_year,
            end_year,
            forms,
        } => commands::ingest::backfill(config, start_year, end_year, forms, quiet).await,
        Commands::Download {
            start_year,
            end_year,
            forms,
            limit,
            max_downloads,
            concurrency,
            overwrite,
        } => {
            commands::download::download_documents(
                config,
                commands::download::DownloadArgs {
                    start_year,
                    end_year,
                    forms,
                    limit,
                    max_downloads,
                    concurrency,
                    overwrite,
                },
                quiet,
            )
            .await
        }
        Commands::Stats { format } => commands::stats::show_stats(config, &format),
        Commands::Init { .. } => Ok(()),
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured levels.
fn init_logging(config: &Config, verbose: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.logging.filter_directive(verbose)))
        .context("Invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let result = match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
