//! cumulus - collect cloud imagery and metadata from museum collection APIs
//!
//! Queries institutional APIs, stores normalized records and image files,
//! and builds the merged archive handed to the clustering tool.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "cumulus")]
#[command(about = "Collect cloud imagery and metadata from museum collection APIs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./cumulus.toml or ~/.config/cumulus/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output directory (overrides [output] dir)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a collection run
    Collect(cmd::collect::CollectArgs),
    /// Resume an interrupted run (default: the latest)
    Resume(cmd::collect::ResumeArgs),
    /// List runs with their status and per-source cursors
    Runs,
    /// Manage manual additions
    Manual(cmd::manual::ManualArgs),
    /// Build archive.json from the metadata store
    Merge,
    /// Re-hash stored images against their metadata
    Validate,
    /// Export the merged archive for the clustering tool
    Export(cmd::archive::ExportArgs),
    /// Import cluster labels (CSV with image_path,cluster columns)
    Annotate(cmd::archive::AnnotateArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(cumulus_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug; spinners show activity
    //   non-TTY: info unless --debug; logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    cumulus_core::init_logging(quiet, cli.debug, multi);

    match run(cli, progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli, progress: cumulus_core::SharedProgress) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = cli.output {
        config.output.dir = dir;
    }

    match cli.command {
        Command::Collect(args) => cmd::collect::collect(args, &config, &progress),
        Command::Resume(args) => cmd::collect::resume(args, &config, &progress),
        Command::Runs => cmd::runs::run(&config),
        Command::Manual(args) => cmd::manual::run(args, &config),
        Command::Merge => cmd::archive::merge(&config),
        Command::Validate => cmd::validate::run(&config),
        Command::Export(args) => cmd::archive::export(args, &config),
        Command::Annotate(args) => cmd::archive::annotate(args, &config),
        Command::Config => {
            cmd::show_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}
