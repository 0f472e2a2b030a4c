//! `cumulus manual` - locally curated additions

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Subcommand};
use cumulus_store::MetadataStore;
use cumulus_store::manual;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct ManualArgs {
    #[command(subcommand)]
    pub action: ManualAction,
}

#[derive(Subcommand, Debug)]
pub enum ManualAction {
    /// Import the [[item]] tables of a TOML file; images are copied into the store
    Import {
        /// TOML file; image paths are relative to it
        file: PathBuf,
    },
}

pub fn run(args: ManualArgs, config: &Config) -> Result<ExitCode> {
    match args.action {
        ManualAction::Import { file } => {
            let store = MetadataStore::new(super::layout(config));
            let report = manual::import(&store, &file)?;
            super::print_summary(
                "Manual import",
                &[
                    ("Added", report.added.len().to_string()),
                    ("Updated", report.updated.len().to_string()),
                    ("Unchanged", report.unchanged.len().to_string()),
                ],
            );
            if !report.added.is_empty() || !report.updated.is_empty() {
                eprintln!("Run `cumulus merge` to refresh archive.json");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
