//! Import cluster labels produced by the external clustering tool.
//!
//! Input is a CSV with `image_path` and `cluster` columns; paths may be
//! absolute or relative to the output directory. Labels are stored per image
//! on the metadata record and never touch the collected fields.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cumulus_core::RecordKey;
use serde::Deserialize;

use crate::metadata::MetadataStore;

#[derive(Debug, Deserialize)]
struct ClusterRow {
    image_path: String,
    cluster: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AnnotateReport {
    pub applied: usize,
    pub records_updated: usize,
    /// Paths that match no stored image
    pub unmatched: Vec<String>,
}

/// Apply every row of `csv_path` to the metadata store.
pub fn import_clusters(store: &MetadataStore, csv_path: &Path) -> Result<AnnotateReport> {
    let layout = store.layout();
    let records = store.load_all()?;

    let mut by_path: HashMap<PathBuf, (RecordKey, String)> = HashMap::new();
    for stored in &records {
        for (label, file) in &stored.files {
            by_path.insert(layout.resolve(&file.path), (stored.key(), label.clone()));
        }
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut pending: BTreeMap<RecordKey, BTreeMap<String, String>> = BTreeMap::new();
    let mut report = AnnotateReport::default();

    for (n, row) in reader.deserialize::<ClusterRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad row {}", csv_path.display(), n + 2))?;
        let cluster = row.cluster.trim();
        if cluster.is_empty() {
            continue;
        }
        match by_path.get(&layout.resolve(row.image_path.trim())) {
            Some((key, label)) => {
                pending
                    .entry(key.clone())
                    .or_default()
                    .insert(label.clone(), cluster.to_string());
                report.applied += 1;
            }
            None => report.unmatched.push(row.image_path),
        }
    }

    for stored in records {
        let Some(labels) = pending.remove(&stored.key()) else {
            continue;
        };
        let mut updated = stored.clone();
        updated.annotations.extend(labels);
        if updated != stored {
            store.write(&updated)?;
            report.records_updated += 1;
        }
    }

    if !report.unmatched.is_empty() {
        log::warn!("{} cluster rows match no stored image", report.unmatched.len());
    }
    Ok(report)
}
