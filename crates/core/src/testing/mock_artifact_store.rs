//! Mock artifact store for testing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::artifact::{validate_key, ArtifactError, ArtifactRef, ArtifactStore};

/// In-memory artifact store with failure injection.
#[derive(Debug, Default)]
pub struct MockArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    /// If set, the next `put` fails with this error.
    next_error: Mutex<Option<ArtifactError>>,
    /// Delay applied to every `put`.
    put_delay: Mutex<Duration>,
}

impl MockArtifactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `put` with `error`.
    pub fn set_next_error(&self, error: ArtifactError) {
        *self.next_error.lock().unwrap() = Some(error);
    }

    /// Make every subsequent `put` take at least `delay`.
    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = delay;
    }

    /// Stored bytes, if any.
    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop an object, simulating external deletion.
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().remove(key)
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<ArtifactRef, ArtifactError> {
        validate_key(key)?;
        let delay = *self.put_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.next_error.lock().unwrap().take() {
            return Err(error);
        }
        let artifact = ArtifactRef::describe(key, &bytes, content_type);
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(artifact)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        validate_key(key)?;
        self.get_bytes(key)
            .ok_or_else(|| ArtifactError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, ArtifactError> {
        validate_key(key)?;
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}
