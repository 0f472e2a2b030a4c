//! On-disk layout of an output directory
//!
//! ```text
//! {base}/
//! ├── metadata/{source}/{object_id}.json
//! ├── images/{source}/{object_id}_{label}.{ext}
//! ├── runs/{run-id}/
//! │   ├── run.json
//! │   └── log.jsonl
//! └── archive.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use cumulus_core::hash::{hash_bytes, short_hash};
use cumulus_core::{SourceTag, StorageError};
use serde::Serialize;

/// Extensions accepted from image URLs; anything else is stored as `.jpg`
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "tif", "tiff", "webp"];

/// Paths under one output directory.
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn metadata_dir(&self, source: SourceTag) -> PathBuf {
        self.base.join("metadata").join(source.name())
    }

    pub fn metadata_path(&self, source: SourceTag, object_id: &str) -> PathBuf {
        self.metadata_dir(source)
            .join(format!("{}.json", file_stem(object_id)))
    }

    pub fn images_dir(&self, source: SourceTag) -> PathBuf {
        self.base.join("images").join(source.name())
    }

    pub fn image_path(&self, source: SourceTag, object_id: &str, label: &str, ext: &str) -> PathBuf {
        self.images_dir(source).join(format!(
            "{}_{}.{ext}",
            file_stem(object_id),
            file_stem(label)
        ))
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base.join("runs")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(run_id)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.base.join("archive.json")
    }

    /// `path` relative to the base, with `/` separators
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.base).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve a stored relative path (or pass an absolute one through)
    pub fn resolve(&self, stored: &str) -> PathBuf {
        let path = Path::new(stored);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }
}

/// Object id made safe for a file name: anything outside `[A-Za-z0-9._-]`
/// becomes `_`. An id changed by that gets `-<8 hex of blake3(id)>` appended,
/// so distinct ids never share a stem.
pub fn file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = !stem.is_empty() && !stem.chars().all(|c| c == '.');
    if safe && stem == id {
        return stem;
    }
    let stem = if safe { stem } else { "_".to_string() };
    format!("{stem}-{}", short_hash(&hash_bytes(id.as_bytes())))
}

/// Image extension taken from the URL path, defaulting to `jpg`.
pub fn extension_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let ext = last
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    IMAGE_EXTENSIONS
        .iter()
        .find(|&&known| known == ext)
        .copied()
        .unwrap_or("jpg")
}

/// Write `value` as pretty JSON via a `.tmp` sibling and a rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| StorageError::new(path, std::io::Error::other(e)))?;
    write_atomic(path, &json)
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::new(parent, e))?;
    }
    let tmp = cumulus_core::http::tmp_path(path);
    fs::write(&tmp, bytes).map_err(|e| StorageError::new(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StorageError::new(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_layout() {
        let layout = Layout::new("/data/clouds");
        assert_eq!(
            layout.metadata_path(SourceTag::Met, "437112"),
            PathBuf::from("/data/clouds/metadata/met_museum/437112.json")
        );
        assert_eq!(
            layout.image_path(SourceTag::Rijksmuseum, "SK-A-4118", "full", "jpg"),
            PathBuf::from("/data/clouds/images/rijksmuseum/SK-A-4118_full.jpg")
        );
        assert_eq!(
            layout.relative(&layout.image_path(SourceTag::Met, "1", "primary", "png")),
            "images/met_museum/1_primary.png"
        );
        assert_eq!(layout.resolve("archive.json"), PathBuf::from("/data/clouds/archive.json"));
    }

    #[test]
    fn file_stem_sanitizes() {
        assert_eq!(file_stem("SK-A-4118"), "SK-A-4118");
        assert_eq!(file_stem("h-0a1b2c3d"), "h-0a1b2c3d");
        let stem = file_stem("edanmdm:saam 1929/6");
        assert!(stem.starts_with("edanmdm_saam_1929_6-"));
        assert_eq!(stem.len(), "edanmdm_saam_1929_6-".len() + 8);
        assert!(file_stem("..").starts_with("_-"));
        assert!(file_stem("").starts_with("_-"));
    }

    #[test]
    fn sanitized_ids_keep_distinct_stems() {
        assert_ne!(file_stem("/2021/item:1"), file_stem("_2021_item_1"));
        assert_eq!(file_stem("_2021_item_1"), "_2021_item_1");
        assert_eq!(file_stem("/2021/item:1"), file_stem("/2021/item:1"));

        let layout = Layout::new("/data");
        assert_ne!(
            layout.metadata_path(SourceTag::Europeana, "/2021/item:1"),
            layout.metadata_path(SourceTag::Europeana, "_2021_item_1")
        );
    }

    #[test]
    fn extension_from_url() {
        assert_eq!(extension_for("https://images.metmuseum.org/a/DT1567.JPG"), "jpg");
        assert_eq!(extension_for("https://x.org/img.png?size=large"), "png");
        assert_eq!(extension_for("https://ids.si.edu/ids/deliveryService?id=X"), "jpg");
        assert_eq!(extension_for("https://lh3.googleusercontent.com/abc=s0"), "jpg");
        assert_eq!(extension_for("https://x.org/scan.tiff"), "tiff");
    }

    #[test]
    fn atomic_write_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/value.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        assert!(path.exists());
        assert!(!cumulus_core::http::tmp_path(&path).exists());
        let back: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back["a"], 1);
    }
}
