use std::path::Path;

use base64::Engine;
use sha2::{Digest, Sha256};

use super::IngestionError;

/// SHA-256 content hash of a guideline file, base64-encoded.
/// Drives ingest idempotence: same path + same hash is a no-op.
pub fn compute_content_hash(path: &Path) -> Result<String, IngestionError> {
    let content = std::fs::read(path)?;
    Ok(hash_bytes(&content))
}

pub fn hash_bytes(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    base64::engine::general_purpose::STANDARD.encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.md");
        std::fs::write(&path, "Methotrexate weekly dosing guideline").unwrap();

        let h1 = compute_content_hash(&path).unwrap();
        let h2 = compute_content_hash(&path).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn different_content_different_hash() {
        assert_ne!(hash_bytes(b"Content A"), hash_bytes(b"Content B"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = compute_content_hash(Path::new("/nonexistent/guide.md"));
        assert!(matches!(result, Err(IngestionError::Io(_))));
    }
}
