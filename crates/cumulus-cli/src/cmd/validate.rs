//! `cumulus validate` - check stored images against their metadata

use std::process::ExitCode;

use anyhow::Result;
use comfy_table::{Cell, Color};
use cumulus_core::progress::fmt_num;
use cumulus_store::{MetadataStore, validate};

use crate::config::Config;

/// Rows of not-downloaded images listed before eliding the rest
const MAX_LISTED: usize = 20;

pub fn run(config: &Config) -> Result<ExitCode> {
    let store = MetadataStore::new(super::layout(config));
    let report = validate(&store)?;

    if !report.issues.is_empty() {
        let mut table = super::table(&["Record", "Label", "Path", "Problem"]);
        for issue in &report.issues {
            table.add_row(vec![
                Cell::new(&issue.key),
                Cell::new(&issue.label),
                Cell::new(&issue.path),
                Cell::new(&issue.problem).fg(Color::Red),
            ]);
        }
        eprintln!("\n{table}");
    }

    if !report.not_downloaded.is_empty() {
        log::info!("{} images were never downloaded", report.not_downloaded.len());
        for (key, label) in report.not_downloaded.iter().take(MAX_LISTED) {
            log::debug!("not downloaded: {key} {label}");
        }
    }

    super::print_summary(
        "Validation",
        &[
            ("Records", fmt_num(report.records)),
            ("Files checked", fmt_num(report.files_checked)),
            ("Problems", fmt_num(report.issues.len())),
            ("Not downloaded", fmt_num(report.not_downloaded.len())),
        ],
    );

    if report.is_ok() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}
