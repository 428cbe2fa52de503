//! Edit lock types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{TaskError, TaskStatus};

/// Edit lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockConfig {
    /// TTL for explicit locks when the caller does not ask for one.
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    /// TTL of the short-lived lock taken around a single slide edit.
    #[serde(default = "default_implicit_ttl")]
    pub implicit_ttl_secs: u64,

    /// Upper bound on any requested TTL.
    #[serde(default = "default_max_ttl")]
    pub max_ttl_secs: u64,
}

fn default_ttl() -> u64 {
    300 // 5 minutes
}

fn default_implicit_ttl() -> u64 {
    30
}

fn default_max_ttl() -> u64 {
    3600 // 1 hour
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl(),
            implicit_ttl_secs: default_implicit_ttl(),
            max_ttl_secs: default_max_ttl(),
        }
    }
}

/// A granted edit lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockLease {
    pub task_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Task version after the lock was written.
    pub version: u64,
}

/// Manual changes to one slide. Unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SlideEdits {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub speaker_notes: Option<String>,
}

impl SlideEdits {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.image_ref.is_none() && self.speaker_notes.is_none()
    }
}

/// Errors from the lock manager.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LockError {
    #[error("Task not found: {0}")]
    NotFound(String),

    /// Locked by someone else, or the task is still generating.
    #[error("Lock unavailable for task {task_id}: {reason}")]
    Unavailable { task_id: String, reason: String },

    #[error("Slide {slide_index} not found in task {task_id}")]
    SlideNotFound { task_id: String, slide_index: u32 },

    #[error("Slide {slide_index} was modified: expected edit version {expected}, found {actual}")]
    Conflict {
        slide_index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("Cannot {operation} task {task_id} in status {status}")]
    InvalidState {
        task_id: String,
        status: TaskStatus,
        operation: String,
    },

    #[error("Task store error: {0}")]
    Store(TaskError),
}

impl From<TaskError> for LockError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(id) => LockError::NotFound(id),
            other => LockError::Store(other),
        }
    }
}
