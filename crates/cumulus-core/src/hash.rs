//! Blake3 hashing utilities for file integrity and deterministic ids

use std::io;
use std::path::Path;

/// Hash a file's contents with blake3.
pub fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap(path)?;
    Ok(hasher.finalize())
}

/// Hash raw bytes with blake3.
pub fn hash_bytes(data: &[u8]) -> blake3::Hash {
    blake3::hash(data)
}

/// Return the first 8 hex characters of a blake3 hash.
pub fn short_hash(hash: &blake3::Hash) -> String {
    hash.to_hex()[..8].to_string()
}

/// Deterministic id for a payload that carries none: `h-` + short hash of its JSON.
///
/// `serde_json::Value` objects serialize with sorted keys, so equal payloads
/// always yield equal ids.
pub fn payload_id(payload: &serde_json::Value) -> String {
    format!("h-{}", short_hash(&hash_bytes(payload.to_string().as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_bytes_deterministic() {
        assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn short_hash_length() {
        assert_eq!(short_hash(&hash_bytes(b"test")).len(), 8);
    }

    #[test]
    fn hash_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.jpg");
        std::fs::write(&path, b"file content").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"file content"));
    }

    #[test]
    fn payload_id_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b = json!({"a": 2, "b": 1});
        assert_eq!(payload_id(&a), payload_id(&b));
        assert!(payload_id(&a).starts_with("h-"));
        assert_ne!(payload_id(&a), payload_id(&json!({"a": 3})));
    }
}
