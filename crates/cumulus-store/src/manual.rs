//! Manual additions declared in a TOML file.
//!
//! ```toml
//! [[item]]
//! image = "scans/fog-harbour.jpg"   # relative to this file
//! title = "Fog over the harbour"
//! creator = "unknown photographer"
//! tags = ["fog", "harbour"]
//! note = "from the 1920s postcard box"
//! ```
//!
//! Ids are `m-` plus 16 hex chars of the image's blake3 hash, so importing
//! the same file twice yields the same record.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cumulus_core::{Field, Record, SourceTag};
use serde::{Deserialize, Serialize};

use crate::layout::extension_for;
use crate::metadata::{MetadataStore, StoredFile, StoredRecord};

/// Label under which the imported file is stored
pub const MANUAL_LABEL: &str = "original";

#[derive(Debug, Deserialize)]
pub struct ManualFile {
    #[serde(default)]
    pub item: Vec<ManualItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualItem {
    pub image: PathBuf,
    pub title: Option<String>,
    pub creator: Option<String>,
    pub date: Option<String>,
    pub medium: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub collection: Option<String>,
    pub rights: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ManualFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("invalid manual file {}", path.display()))
    }
}

fn known(value: &Option<String>) -> Field<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .into()
}

/// Import every item of `file` into the store, copying images alongside.
pub fn import(store: &MetadataStore, file: &Path) -> Result<ImportReport> {
    let manual = ManualFile::load(file)?;
    let base_dir = file.parent().unwrap_or(Path::new("."));
    let mut report = ImportReport::default();

    for item in &manual.item {
        let image = if item.image.is_absolute() {
            item.image.clone()
        } else {
            base_dir.join(&item.image)
        };
        let (outcome, id) = import_item(store, item, &image)
            .with_context(|| format!("failed to import {}", image.display()))?;
        match outcome {
            Outcome::Added => report.added.push(id),
            Outcome::Updated => report.updated.push(id),
            Outcome::Unchanged => report.unchanged.push(id),
        }
    }
    log::info!(
        "manual import: {} added, {} updated, {} unchanged",
        report.added.len(),
        report.updated.len(),
        report.unchanged.len()
    );
    Ok(report)
}

enum Outcome {
    Added,
    Updated,
    Unchanged,
}

fn import_item(store: &MetadataStore, item: &ManualItem, image: &Path) -> Result<(Outcome, String)> {
    let hash = cumulus_core::hash::hash_file(image)?;
    let id = format!("m-{}", &hash.to_hex()[..16]);
    let layout = store.layout();

    let ext = extension_for(&image.to_string_lossy());
    let dest = layout.image_path(SourceTag::Manual, &id, MANUAL_LABEL, ext);
    if !dest.exists() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(image, &dest)
            .with_context(|| format!("failed to copy to {}", dest.display()))?;
    }

    let original = serde_json::to_value(item)?;
    let mut record = Record::new(SourceTag::Manual, id.clone(), original);
    record.title = known(&item.title);
    record.creator = known(&item.creator);
    record.date = known(&item.date);
    record.medium = known(&item.medium);
    record.collection = known(&item.collection);
    record.rights = known(&item.rights);
    record.tags = item
        .tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    record
        .images
        .insert(MANUAL_LABEL.into(), image.to_string_lossy().into_owned());

    let mut stored = StoredRecord::new(record);
    stored
        .files
        .insert(MANUAL_LABEL.into(), StoredFile::from_disk(layout, &dest)?);

    let outcome = match store.read(SourceTag::Manual, &id)? {
        Some(existing) => {
            stored.annotations = existing.annotations.clone();
            if existing == stored {
                return Ok((Outcome::Unchanged, id));
            }
            Outcome::Updated
        }
        None => Outcome::Added,
    };
    store.write(&stored)?;
    Ok((outcome, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    fn setup() -> (tempfile::TempDir, MetadataStore, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();
        fs::write(inbox.join("fog.jpg"), b"fog pixels").unwrap();
        fs::write(inbox.join("mist.png"), b"mist pixels").unwrap();
        let manifest = inbox.join("manual.toml");
        fs::write(
            &manifest,
            r#"
[[item]]
image = "fog.jpg"
title = "Fog over the harbour"
tags = ["fog", " "]

[[item]]
image = "mist.png"
creator = ""
"#,
        )
        .unwrap();
        let store = MetadataStore::new(Layout::new(dir.path().join("out")));
        (dir, store, manifest)
    }

    #[test]
    fn imports_items_with_content_ids() {
        let (_dir, store, manifest) = setup();
        let report = import(&store, &manifest).unwrap();
        assert_eq!(report.added.len(), 2);

        let id = &report.added[0];
        assert!(id.starts_with("m-"));
        assert_eq!(id.len(), 18);
        let stored = store.read(SourceTag::Manual, id).unwrap().unwrap();
        assert_eq!(stored.record.title, Field::Known("Fog over the harbour".into()));
        assert_eq!(stored.record.tags.len(), 1);
        let file = &stored.files[MANUAL_LABEL];
        assert!(store.layout().resolve(&file.path).is_file());

        let mist = store.read(SourceTag::Manual, &report.added[1]).unwrap().unwrap();
        assert!(mist.record.creator.is_unknown());
        assert!(mist.files[MANUAL_LABEL].path.ends_with(".png"));
    }

    #[test]
    fn reimport_is_idempotent() {
        let (_dir, store, manifest) = setup();
        let first = import(&store, &manifest).unwrap();
        let before = store.load_all().unwrap();
        let second = import(&store, &manifest).unwrap();
        assert!(second.added.is_empty());
        assert_eq!(second.unchanged, first.added);
        assert_eq!(store.load_all().unwrap(), before);
    }

    #[test]
    fn missing_image_is_an_error() {
        let (dir, store, _) = setup();
        let manifest = dir.path().join("bad.toml");
        fs::write(&manifest, "[[item]]\nimage = \"nope.jpg\"\n").unwrap();
        assert!(import(&store, &manifest).is_err());
    }
}
