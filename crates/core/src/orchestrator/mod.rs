//! Generation orchestrator.
//!
//! The orchestrator is the only writer of generation state:
//! - **Submission**: validates requests and enters the outline stage
//! - **Dispatch handling**: runs stage executors and applies their results
//!   with conditional updates, discarding stale or duplicate deliveries
//! - **Recovery**: watchdog for missed deadlines, cancel and retry-from-stage
//! - **Editing**: lock-guarded slide edits on completed decks

mod config;
mod editing;
mod machine;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use editing::EditLock;
pub use runner::Orchestrator;
pub use types::{DiscardReason, DispatchOutcome, OrchestratorError, OrchestratorStatus};
