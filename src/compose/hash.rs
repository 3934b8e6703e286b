//! Content fingerprints for change detection.
//!
//! The writer compares the hash of what it is about to write with the hash
//! of what is on disk and skips unchanged files, which is what makes a
//! second reconciliation a no-op.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Hasher for document contents.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentHasher;

impl DocumentHasher {
    /// Creates a new document hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// SHA-256 of a document's text, hex-encoded.
    #[must_use]
    pub fn hash_str(&self, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Hash of a file on disk, `None` if it cannot be read.
    pub async fn hash_file(&self, path: &Path) -> Option<String> {
        tokio::fs::read_to_string(path)
            .await
            .ok()
            .map(|content| self.hash_str(&content))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}
