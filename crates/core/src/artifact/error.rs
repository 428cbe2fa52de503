//! Error types for the artifact store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while storing or reading artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Key is empty, absolute or escapes the store root.
    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Failed to create the parent directory.
    #[error("Failed to create directory: {path}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact {key}")]
    WriteFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read artifact {key}")]
    ReadFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// Backend is unreachable or refused the operation.
    #[error("Artifact store unavailable: {0}")]
    Unavailable(String),
}
