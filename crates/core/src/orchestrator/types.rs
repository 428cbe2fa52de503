//! Types for the generation orchestrator.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::LockError;
use crate::task::{TaskError, TaskStatus, ValidationError};

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("slide {slide_index} not found in task {task_id}")]
    SlideNotFound { task_id: String, slide_index: u32 },

    /// A conditional write kept losing to concurrent writers.
    #[error("version conflict on task {0}")]
    VersionConflict(String),

    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    /// The caller's view of a slide is stale.
    #[error("slide {slide_index} was modified: expected edit version {expected}, found {actual}")]
    Conflict {
        slide_index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("cannot {operation} task {task_id} in status {status}")]
    InvalidState {
        task_id: String,
        status: TaskStatus,
        operation: String,
    },

    /// The deck could not be rebuilt after an edit; the task is now failed.
    #[error("edit failed: {0}")]
    EditFailed(String),

    #[error("task store error: {0}")]
    Store(TaskError),
}

impl From<TaskError> for OrchestratorError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(id) => OrchestratorError::NotFound(id),
            TaskError::VersionConflict { task_id, .. } => OrchestratorError::VersionConflict(task_id),
            other => OrchestratorError::Store(other),
        }
    }
}

impl From<LockError> for OrchestratorError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::NotFound(id) => OrchestratorError::NotFound(id),
            LockError::Unavailable { reason, .. } => OrchestratorError::LockUnavailable(reason),
            LockError::SlideNotFound {
                task_id,
                slide_index,
            } => OrchestratorError::SlideNotFound {
                task_id,
                slide_index,
            },
            LockError::Conflict {
                slide_index,
                expected,
                actual,
            } => OrchestratorError::Conflict {
                slide_index,
                expected,
                actual,
            },
            LockError::InvalidEdit(message) => {
                OrchestratorError::Validation(ValidationError::single("edits", message))
            }
            LockError::InvalidState {
                task_id,
                status,
                operation,
            } => OrchestratorError::InvalidState {
                task_id,
                status,
                operation,
            },
            LockError::Store(e) => e.into(),
        }
    }
}

/// Why a dispatch result was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DiscardReason {
    TaskMissing,
    /// The task is no longer in the phase this dispatch belongs to.
    WrongStatus { status: TaskStatus },
    /// The phase was re-entered since this dispatch was issued.
    StaleEpoch { expected: u64, current: u64 },
    UnknownUnit,
    /// The unit's result is already applied.
    AlreadyApplied,
    /// A newer attempt of this unit was dispatched.
    SupersededAttempt { attempt: u32, current: u32 },
}

impl DiscardReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            DiscardReason::TaskMissing => "task_missing",
            DiscardReason::WrongStatus { .. } => "wrong_status",
            DiscardReason::StaleEpoch { .. } => "stale_epoch",
            DiscardReason::UnknownUnit => "unknown_unit",
            DiscardReason::AlreadyApplied => "already_applied",
            DiscardReason::SupersededAttempt { .. } => "superseded_attempt",
        }
    }
}

/// What handling one dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Output stored; `status` is the task status after the write.
    Applied { status: TaskStatus },
    /// Retryable failure; the unit was redispatched.
    Retrying { attempt: u32, delay: Duration },
    /// The task moved to `FAILED`.
    Failed { message: String },
    Discarded(DiscardReason),
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether the workers are running.
    pub running: bool,
    pub workers: usize,
    /// Dispatches waiting in the queue.
    pub queued_dispatches: usize,
    /// Task counts keyed by status.
    pub tasks_by_status: BTreeMap<String, i64>,
}
