//! Merged archive: the deduplicated union of collected and manual records

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cumulus_core::{RecordKey, SourceTag};
use serde::{Deserialize, Serialize};

use crate::layout::{Layout, write_json_atomic};
use crate::metadata::{MetadataStore, StoredFile, StoredRecord};

/// Records keyed by (source, object_id); a key appears at most once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedArchive {
    entries: BTreeMap<RecordKey, StoredRecord>,
}

/// One image file of one archived record
#[derive(Debug, Clone, Copy)]
pub struct ArchivedImage<'a> {
    pub stored: &'a StoredRecord,
    pub label: &'a str,
    pub file: &'a StoredFile,
}

impl<'a> ArchivedImage<'a> {
    pub fn cluster(&self) -> Option<&'a str> {
        self.stored.annotations.get(self.label).map(String::as_str)
    }
}

#[derive(Serialize, Deserialize)]
struct ArchiveFile {
    generated_at: DateTime<Utc>,
    records: Vec<StoredRecord>,
}

impl MergedArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `incoming` into the archive.
    ///
    /// An incoming entry replaces an existing one with the same key; the
    /// existing annotations survive unless the incoming entry brings its own.
    /// Merging the same entries twice leaves the archive unchanged.
    pub fn merge<I>(&mut self, incoming: I)
    where
        I: IntoIterator<Item = StoredRecord>,
    {
        for mut entry in incoming {
            let key = entry.key();
            if let Some(existing) = self.entries.remove(&key) {
                if entry.annotations.is_empty() {
                    entry.annotations = existing.annotations;
                }
            }
            self.entries.insert(key, entry);
        }
    }

    /// `merge(a, b)` without touching either input
    pub fn merged(&self, other: &MergedArchive) -> MergedArchive {
        let mut out = self.clone();
        out.merge(other.entries.values().cloned());
        out
    }

    /// Archive of everything in the metadata store.
    pub fn from_store(store: &MetadataStore) -> Result<Self> {
        let mut archive = Self::new();
        archive.merge(store.load_all()?);
        Ok(archive)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &RecordKey) -> Option<&StoredRecord> {
        self.entries.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &StoredRecord> {
        self.entries.values()
    }

    /// Every stored image file, in key then label order.
    pub fn images(&self) -> impl Iterator<Item = ArchivedImage<'_>> {
        self.entries.values().flat_map(|stored| {
            stored.files.iter().map(move |(label, file)| ArchivedImage {
                stored,
                label,
                file,
            })
        })
    }

    /// Record count per source
    pub fn counts(&self) -> BTreeMap<SourceTag, usize> {
        let mut counts = BTreeMap::new();
        for key in self.entries.keys() {
            *counts.entry(key.source).or_default() += 1;
        }
        counts
    }

    pub fn save(&self, layout: &Layout) -> Result<()> {
        let file = ArchiveFile {
            generated_at: Utc::now(),
            records: self.entries.values().cloned().collect(),
        };
        write_json_atomic(&layout.archive_path(), &file)?;
        Ok(())
    }

    pub fn load(layout: &Layout) -> Result<Self> {
        let path = layout.archive_path();
        let content = fs::read(&path)
            .with_context(|| format!("no archive at {} (run `cumulus merge`)", path.display()))?;
        let file: ArchiveFile = serde_json::from_slice(&content)
            .with_context(|| format!("invalid archive {}", path.display()))?;
        let mut archive = Self::new();
        archive.merge(file.records);
        Ok(archive)
    }
}
