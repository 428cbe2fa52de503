//! File system artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::error::ArtifactError;
use super::traits::{validate_key, ArtifactStore};
use super::types::ArtifactRef;

/// Stores artifacts as files under a root directory.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<ArtifactRef, ArtifactError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ArtifactError::DirectoryCreationFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        // Write to a sibling temp file, then rename so readers never see a
        // partial artifact.
        let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let write_err = |e| ArtifactError::WriteFailed {
            key: key.to_string(),
            source: e,
        };
        let mut file = fs::File::create(&tmp_path).await.map_err(write_err)?;
        file.write_all(&bytes).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(write_err(e));
        }

        let artifact = ArtifactRef::describe(key, &bytes, content_type);
        debug!(
            key = %artifact.key,
            size_bytes = artifact.size_bytes,
            "Stored artifact"
        );
        Ok(artifact)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(key.to_string()))
            }
            Err(e) => Err(ArtifactError::ReadFailed {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, ArtifactError> {
        let path = self.path_for(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| ArtifactError::ReadFailed {
                key: key.to_string(),
                source: e,
            })
    }
}
