//! Edit locks for completed presentations.

mod manager;
mod types;

pub use manager::LockManager;
pub use types::{LockConfig, LockError, LockLease, SlideEdits};
