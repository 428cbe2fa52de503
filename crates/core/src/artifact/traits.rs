//! Trait definitions for artifact storage.

use async_trait::async_trait;

use super::error::ArtifactError;
use super::types::ArtifactRef;

/// Durable blob storage for compiled decks and their manifests.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Returns the name of this store implementation.
    fn name(&self) -> &str;

    /// Store `bytes` under `key`, replacing any previous content.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<ArtifactRef, ArtifactError>;

    /// Read the content stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError>;

    async fn exists(&self, key: &str) -> Result<bool, ArtifactError>;
}

/// Reject keys that are empty, absolute or contain parent components.
pub fn validate_key(key: &str) -> Result<(), ArtifactError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(ArtifactError::InvalidKey(key.to_string()));
    }
    Ok(())
}
