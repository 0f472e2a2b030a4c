//! Tabular export of the merged archive for external clustering tools

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::archive::MergedArchive;
use crate::layout::Layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// One row per image file.
#[derive(Debug, Serialize)]
pub struct ExportRow<'a> {
    pub source: &'a str,
    pub object_id: &'a str,
    pub label: &'a str,
    /// Absolute path of the image file
    pub image_path: String,
    pub bytes: u64,
    pub blake3: &'a str,
    pub title: String,
    pub creator: String,
    pub date: String,
    pub medium: String,
    pub collection: String,
    pub rights: String,
    /// `;`-joined
    pub tags: String,
    pub url: &'a str,
    pub cluster: &'a str,
}

/// Rows for every stored image, in archive order.
pub fn rows<'a>(archive: &'a MergedArchive, layout: &Layout) -> Vec<ExportRow<'a>> {
    archive
        .images()
        .map(|image| {
            let record = &image.stored.record;
            ExportRow {
                source: record.source.name(),
                object_id: &record.object_id,
                label: image.label,
                image_path: layout.resolve(&image.file.path).to_string_lossy().into_owned(),
                bytes: image.file.bytes,
                blake3: &image.file.blake3,
                title: record.title.to_string(),
                creator: record.creator.to_string(),
                date: record.date.to_string(),
                medium: record.medium.to_string(),
                collection: record.collection.to_string(),
                rights: record.rights.to_string(),
                tags: record.tags.iter().cloned().collect::<Vec<_>>().join(";"),
                url: record.images.get(image.label).map_or("", String::as_str),
                cluster: image.cluster().unwrap_or(""),
            }
        })
        .collect()
}

/// Write the archive to `out`; returns the number of rows (CSV) or records (JSON).
pub fn export<W: Write>(
    archive: &MergedArchive,
    layout: &Layout,
    format: ExportFormat,
    out: W,
) -> Result<usize> {
    match format {
        ExportFormat::Csv => {
            let rows = rows(archive, layout);
            let mut writer = csv::Writer::from_writer(out);
            for row in &rows {
                writer.serialize(row).context("failed to write CSV row")?;
            }
            writer.flush().context("failed to flush CSV")?;
            Ok(rows.len())
        }
        ExportFormat::Json => {
            let records: Vec<_> = archive.records().collect();
            serde_json::to_writer_pretty(out, &records).context("failed to write JSON")?;
            Ok(records.len())
        }
    }
}
