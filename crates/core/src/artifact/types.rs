//! Artifact reference type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Pointer to a stored blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRef {
    /// Store-relative key, e.g. `tasks/{id}/deck.md`.
    pub key: String,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the content.
    pub checksum: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRef {
    /// Describe `bytes` stored under `key`.
    pub fn describe(key: impl Into<String>, bytes: &[u8], content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size_bytes: bytes.len() as u64,
            checksum: sha256_hex(bytes),
            content_type: content_type.into(),
            created_at: Utc::now(),
        }
    }

    /// Returns true if `bytes` match the recorded size and checksum.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        bytes.len() as u64 == self.size_bytes && sha256_hex(bytes) == self.checksum
    }
}

/// Hex-encoded SHA-256 digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
