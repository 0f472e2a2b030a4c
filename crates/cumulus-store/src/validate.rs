//! Re-hash stored image files against their metadata

use anyhow::Result;
use cumulus_core::RecordKey;
use rayon::prelude::*;

use crate::metadata::MetadataStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    Missing,
    SizeMismatch { expected: u64, actual: u64 },
    HashMismatch { expected: String, actual: String },
    Unreadable(String),
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("missing"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size {actual} bytes, expected {expected}")
            }
            Self::HashMismatch { expected, actual } => {
                write!(f, "blake3 {}, expected {}", short(actual), short(expected))
            }
            Self::Unreadable(e) => write!(f, "unreadable: {e}"),
        }
    }
}

fn short(hex: &str) -> &str {
    hex.get(..8).unwrap_or(hex)
}

/// One file that failed validation.
#[derive(Debug, Clone)]
pub struct FileIssue {
    pub key: RecordKey,
    pub label: String,
    pub path: String,
    pub problem: Problem,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub records: usize,
    pub files_checked: usize,
    pub issues: Vec<FileIssue>,
    /// (key, label) pairs with a URL but no downloaded file
    pub not_downloaded: Vec<(RecordKey, String)>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check every file recorded in the metadata store, hashing in parallel.
pub fn validate(store: &MetadataStore) -> Result<ValidationReport> {
    let records = store.load_all()?;
    let layout = store.layout();

    let files: Vec<_> = records
        .iter()
        .flat_map(|stored| {
            stored
                .files
                .iter()
                .map(move |(label, file)| (stored.key(), label, file))
        })
        .collect();

    let mut issues: Vec<FileIssue> = files
        .par_iter()
        .filter_map(|(key, label, file)| {
            let path = layout.resolve(&file.path);
            let problem = match std::fs::metadata(&path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(Problem::Missing),
                Err(e) => Some(Problem::Unreadable(e.to_string())),
                Ok(meta) if meta.len() != file.bytes => Some(Problem::SizeMismatch {
                    expected: file.bytes,
                    actual: meta.len(),
                }),
                Ok(_) => match cumulus_core::hash::hash_file(&path) {
                    Ok(h) if h.to_hex().as_str() == file.blake3 => None,
                    Ok(h) => Some(Problem::HashMismatch {
                        expected: file.blake3.clone(),
                        actual: h.to_hex().to_string(),
                    }),
                    Err(e) => Some(Problem::Unreadable(e.to_string())),
                },
            };
            problem.map(|problem| FileIssue {
                key: key.clone(),
                label: label.to_string(),
                path: file.path.clone(),
                problem,
            })
        })
        .collect();
    issues.sort_by(|a, b| (&a.key, &a.label).cmp(&(&b.key, &b.label)));

    let not_downloaded = records
        .iter()
        .flat_map(|stored| {
            stored
                .missing_labels()
                .map(move |label| (stored.key(), label.to_string()))
        })
        .collect();

    Ok(ValidationReport {
        records: records.len(),
        files_checked: files.len(),
        issues,
        not_downloaded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::metadata::{StoredFile, StoredRecord};
    use cumulus_core::{Record, SourceTag};
    use serde_json::json;

    fn store_with_images(dir: &std::path::Path) -> MetadataStore {
        let layout = Layout::new(dir);
        let store = MetadataStore::new(layout.clone());
        for id in ["1", "2", "3"] {
            let mut record = Record::new(SourceTag::Met, id, json!({}));
            record.images.insert("primary".into(), format!("https://x.org/{id}.jpg"));
            record.images.insert("small".into(), format!("https://x.org/{id}s.jpg"));
            let path = layout.image_path(SourceTag::Met, id, "primary", "jpg");
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("image {id}")).unwrap();
            let mut stored = StoredRecord::new(record);
            stored
                .files
                .insert("primary".into(), StoredFile::from_disk(&layout, &path).unwrap());
            store.write(&stored).unwrap();
        }
        store
    }

    #[test]
    fn clean_store_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_images(dir.path());
        let report = validate(&store).unwrap();
        assert!(report.is_ok());
        assert_eq!(report.records, 3);
        assert_eq!(report.files_checked, 3);
        assert_eq!(report.not_downloaded.len(), 3);
    }

    #[test]
    fn detects_tampered_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_images(dir.path());
        let layout = store.layout();
        std::fs::write(layout.image_path(SourceTag::Met, "1", "primary", "jpg"), "image X").unwrap();
        std::fs::write(layout.image_path(SourceTag::Met, "2", "primary", "jpg"), "longer content").unwrap();
        std::fs::remove_file(layout.image_path(SourceTag::Met, "3", "primary", "jpg")).unwrap();

        let report = validate(&store).unwrap();
        assert!(!report.is_ok());
        let problems: Vec<_> = report
            .issues
            .iter()
            .map(|i| (i.key.object_id.as_str(), &i.problem))
            .collect();
        assert!(matches!(problems[0], ("1", Problem::HashMismatch { .. })));
        assert!(matches!(problems[1], ("2", Problem::SizeMismatch { .. })));
        assert!(matches!(problems[2], ("3", Problem::Missing)));
    }
}
