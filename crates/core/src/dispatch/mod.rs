//! Asynchronous stage dispatch.

mod queue;
mod types;

pub use queue::{DispatchQueue, InMemoryDispatchQueue};
pub use types::{DispatchError, DispatchMessage};
