//! Durable blob storage for compiled output.

mod error;
mod fs_store;
mod traits;
mod types;

pub use error::ArtifactError;
pub use fs_store::FsArtifactStore;
pub use traits::{validate_key, ArtifactStore};
pub use types::{sha256_hex, ArtifactRef};
