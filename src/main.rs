//! # Review Ingest CLI (`rvi`)
//!
//! ## Usage
//!
//! ```bash
//! rvi --config ./config/ingest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rvi init` | Create the inbox, processed, staging and manifest directories |
//! | `rvi ingest` | Ingest new inbox files into partitioned Parquet |
//! | `rvi status` | Show recorded files and pending inbox files |
//! | `rvi pipeline` | Ingest, then run the configured transform and its tests |
//!
//! Logs go to stderr (`RUST_LOG` controls the level); command summaries go
//! to stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use review_ingest::config::{self, Config};
use review_ingest::driver::{self, RunOptions, RunSummary};
use review_ingest::pipeline;
use review_ingest::progress::ProgressMode;
use review_ingest::status;

/// Review Ingest CLI - manifest-driven incremental ingestion of JSON-lines
/// review files into year-partitioned Parquet.
#[derive(Parser)]
#[command(name = "rvi", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ingest.toml`. A missing file at the default
    /// location means built-in defaults relative to the current directory.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the directory layout. Idempotent.
    Init,

    /// Ingest new inbox files.
    ///
    /// Files already listed in the manifest are skipped. Each completed file
    /// is recorded in the manifest and then moved to the processed directory.
    /// The first failure aborts the run; re-running retries that file.
    Ingest {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Show manifest contents and pending inbox files.
    Status,

    /// Ingest, then run `[transform].run` and `[transform].test`.
    Pipeline {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Show what would be ingested without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of files to ingest in this run.
    #[arg(long)]
    limit: Option<usize>,

    /// Override `ingest.batch_size` (records per flushed batch).
    #[arg(long)]
    batch_size: Option<usize>,
}

impl From<RunArgs> for RunOptions {
    fn from(args: RunArgs) -> Self {
        RunOptions {
            dry_run: args.dry_run,
            limit: args.limit,
            batch_size: args.batch_size,
        }
    }
}

const DEFAULT_CONFIG: &str = "./config/ingest.toml";

fn load(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        tracing::info!("no config file at {}, using defaults", path.display());
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    config::load_config(path)
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    if dry_run {
        println!("ingest (dry-run)");
    } else {
        println!("ingest");
    }
    println!("  discovered: {}", summary.discovered);
    println!("  ingested files: {}", summary.ingested.len());
    println!("  skipped files: {}", summary.skipped.len());
    if !summary.archived_leftovers.is_empty() {
        println!("  archived leftovers: {}", summary.archived_leftovers.len());
    }
    if !summary.deferred.is_empty() {
        println!("  deferred files: {}", summary.deferred.len());
    }
    if !dry_run {
        println!("  records written: {}", summary.records);
        println!("  batches written: {}", summary.batches);
    }
    println!("ok");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Init => {
            driver::ensure_dirs(&cfg)?;
            println!("Directories initialized successfully.");
        }
        Commands::Ingest { run } => {
            let options = RunOptions::from(run);
            let summary = driver::run_ingest(&cfg, &options, progress.as_ref())?;
            print_summary(&summary, options.dry_run);
        }
        Commands::Status => {
            status::run_status(&cfg)?;
        }
        Commands::Pipeline { run } => {
            let options = RunOptions::from(run);
            let report = pipeline::run_pipeline(&cfg, &options, progress.as_ref()).await?;
            print_summary(&report.ingest, options.dry_run);
            for step in &report.steps {
                println!("{}: ok", step);
            }
        }
    }

    Ok(())
}
