//! Per-item metadata documents, one JSON file per (source, object_id)

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use cumulus_core::{Record, RecordKey, SourceTag, StorageError};
use serde::{Deserialize, Serialize};

use crate::layout::{Layout, write_json_atomic};

/// One image file written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Relative to the output directory
    pub path: String,
    pub bytes: u64,
    /// Full blake3 hex digest
    pub blake3: String,
}

impl StoredFile {
    /// Hash a file already on disk.
    pub fn from_disk(layout: &Layout, path: &Path) -> Result<Self, StorageError> {
        let bytes = fs::metadata(path)
            .map_err(|e| StorageError::new(path, e))?
            .len();
        let hash = cumulus_core::hash::hash_file(path).map_err(|e| StorageError::new(path, e))?;
        Ok(Self {
            path: layout.relative(path),
            bytes,
            blake3: hash.to_hex().to_string(),
        })
    }
}

/// A record together with its downloaded files and external annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record: Record,
    /// Resolution label → file
    #[serde(default)]
    pub files: BTreeMap<String, StoredFile>,
    /// Resolution label → cluster/group label from downstream tooling
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl StoredRecord {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            files: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> RecordKey {
        self.record.key()
    }

    /// Image labels with a URL but no file on record
    pub fn missing_labels(&self) -> impl Iterator<Item = &str> {
        self.record
            .images
            .keys()
            .filter(|label| !self.files.contains_key(*label))
            .map(String::as_str)
    }
}

/// Metadata documents under `{base}/metadata`.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    layout: Layout,
}

impl MetadataStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn contains(&self, source: SourceTag, object_id: &str) -> bool {
        self.layout.metadata_path(source, object_id).is_file()
    }

    pub fn read(&self, source: SourceTag, object_id: &str) -> Result<Option<StoredRecord>> {
        let path = self.layout.metadata_path(source, object_id);
        if !path.is_file() {
            return Ok(None);
        }
        read_document(&path).map(Some)
    }

    /// Write (or overwrite) one document atomically.
    pub fn write(&self, stored: &StoredRecord) -> Result<(), StorageError> {
        let path = self
            .layout
            .metadata_path(stored.record.source, &stored.record.object_id);
        write_json_atomic(&path, stored)
    }

    /// Every document, sorted by key. Unreadable files are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<StoredRecord>> {
        let pattern = self.layout.base().join("metadata").join("*").join("*.json");
        let pattern_str = pattern.to_string_lossy();

        let mut paths: Vec<_> = glob::glob(&pattern_str)
            .context("invalid glob pattern")?
            .filter_map(|e| e.ok())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in &paths {
            match read_document(path) {
                Ok(stored) => records.push(stored),
                Err(e) => log::warn!("skipping {}: {e:#}", path.display()),
            }
        }
        records.sort_by_key(StoredRecord::key);
        Ok(records)
    }
}

fn read_document(path: &Path) -> Result<StoredRecord> {
    let content =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("invalid record {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_core::Field;
    use serde_json::json;

    fn record(source: SourceTag, id: &str) -> Record {
        let mut r = Record::new(source, id, json!({"id": id}));
        r.title = Field::Known(format!("Cloud {id}"));
        r.images.insert("primary".into(), format!("https://x.org/{id}.jpg"));
        r.images.insert("small".into(), format!("https://x.org/{id}_s.jpg"));
        r
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(Layout::new(dir.path()));
        assert!(!store.contains(SourceTag::Met, "1"));

        let stored = StoredRecord::new(record(SourceTag::Met, "1"));
        store.write(&stored).unwrap();
        assert!(store.contains(SourceTag::Met, "1"));
        assert_eq!(store.read(SourceTag::Met, "1").unwrap(), Some(stored));
        assert_eq!(store.read(SourceTag::Met, "2").unwrap(), None);
    }

    #[test]
    fn load_all_sorted_and_tolerant() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(Layout::new(dir.path()));
        store.write(&StoredRecord::new(record(SourceTag::Smithsonian, "b"))).unwrap();
        store.write(&StoredRecord::new(record(SourceTag::Met, "a"))).unwrap();
        std::fs::write(dir.path().join("metadata/met_museum/broken.json"), b"{").unwrap();

        let all = store.load_all().unwrap();
        let keys: Vec<_> = all.iter().map(|s| s.key().to_string()).collect();
        assert_eq!(keys, ["met_museum/a", "smithsonian/b"]);
    }

    #[test]
    fn stored_file_hashes_disk_content() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let path = layout.image_path(SourceTag::Met, "1", "primary", "jpg");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"pixels").unwrap();

        let file = StoredFile::from_disk(&layout, &path).unwrap();
        assert_eq!(file.path, "images/met_museum/1_primary.jpg");
        assert_eq!(file.bytes, 6);
        assert_eq!(file.blake3, blake3_hex(b"pixels"));
    }

    #[test]
    fn missing_labels_lists_undownloaded() {
        let mut stored = StoredRecord::new(record(SourceTag::Met, "1"));
        stored.files.insert(
            "primary".into(),
            StoredFile {
                path: "images/met_museum/1_primary.jpg".into(),
                bytes: 1,
                blake3: String::new(),
            },
        );
        assert_eq!(stored.missing_labels().collect::<Vec<_>>(), ["small"]);
    }

    fn blake3_hex(data: &[u8]) -> String {
        cumulus_core::hash::hash_bytes(data).to_hex().to_string()
    }
}
