//! `cumulus merge`, `cumulus export` and `cumulus annotate`

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use cumulus_core::progress::fmt_num;
use cumulus_store::annotate::import_clusters;
use cumulus_store::export::export as write_export;
use cumulus_store::{ExportFormat, Layout, MergedArchive, MetadataStore};

use crate::config::Config;

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum Format {
    Csv,
    Json,
}

impl From<Format> for ExportFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Csv => ExportFormat::Csv,
            Format::Json => ExportFormat::Json,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "csv")]
    pub format: Format,

    /// Destination file, `-` for stdout (default: <output>/export.<format>)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AnnotateArgs {
    /// CSV with image_path and cluster columns
    pub file: PathBuf,
}

/// Rebuild archive.json from every metadata document.
fn rebuild(layout: &Layout) -> Result<MergedArchive> {
    let store = MetadataStore::new(layout.clone());
    let archive = MergedArchive::from_store(&store)?;
    archive.save(layout)?;
    Ok(archive)
}

pub fn merge(config: &Config) -> Result<ExitCode> {
    let layout = super::layout(config);
    let archive = rebuild(&layout)?;

    let mut rows: Vec<(&str, String)> = archive
        .counts()
        .into_iter()
        .map(|(tag, n)| (tag.name(), fmt_num(n)))
        .collect();
    rows.push(("Records", fmt_num(archive.len())));
    rows.push(("Images", fmt_num(archive.images().count())));
    super::print_summary("Archive", &rows);
    log::info!("Wrote {}", layout.archive_path().display());
    Ok(ExitCode::SUCCESS)
}

pub fn export(args: ExportArgs, config: &Config) -> Result<ExitCode> {
    let layout = super::layout(config);
    let archive = MergedArchive::load(&layout)?;
    let format = ExportFormat::from(args.format);

    let out = args
        .out
        .unwrap_or_else(|| layout.base().join(format!("export.{}", format.extension())));
    let written = if out.as_os_str() == std::ffi::OsStr::new("-") {
        let stdout = io::stdout().lock();
        write_export(&archive, &layout, format, stdout)?
    } else {
        let file = File::create(&out)
            .with_context(|| format!("failed to create {}", out.display()))?;
        let mut writer = BufWriter::new(file);
        let n = write_export(&archive, &layout, format, &mut writer)?;
        writer
            .flush()
            .with_context(|| format!("failed to write {}", out.display()))?;
        log::info!("Wrote {}", out.display());
        n
    };

    let unit = match format {
        ExportFormat::Csv => "image rows",
        ExportFormat::Json => "records",
    };
    eprintln!("Exported {} {unit}", fmt_num(written));
    Ok(ExitCode::SUCCESS)
}

pub fn annotate(args: AnnotateArgs, config: &Config) -> Result<ExitCode> {
    let layout = super::layout(config);
    let store = MetadataStore::new(layout.clone());
    let report = import_clusters(&store, &args.file)?;
    let archive = rebuild(&layout)?;

    super::print_summary(
        "Annotations",
        &[
            ("Labels applied", fmt_num(report.applied)),
            ("Records updated", fmt_num(report.records_updated)),
            ("Unmatched paths", fmt_num(report.unmatched.len())),
            ("Archive records", fmt_num(archive.len())),
        ],
    );
    for path in report.unmatched.iter().take(10) {
        log::warn!("no stored image at {path}");
    }
    Ok(ExitCode::SUCCESS)
}
