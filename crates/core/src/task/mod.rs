//! Task records: types, validation and storage.

mod memory_store;
mod sqlite_store;
mod store;
mod types;
mod validate;

pub use memory_store::InMemoryTaskStore;
pub use sqlite_store::SqliteTaskStore;
pub use store::{update_with_retry, Mutator, Plan, TaskError, TaskFilter, TaskStore, Updated};
pub use types::{
    FailureKind, GenerationRequest, Language, Phase, Progress, Slide, SlideBounds, SlideSpec,
    SlideStageState, Stage, StatusTransition, Style, Task, TaskFailure, TaskStatus, UnitProgress,
};
pub use validate::{validate_request, FieldViolation, GenerationParams, RequestLimits, ValidationError};
