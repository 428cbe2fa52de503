//! Dispatch message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::Stage;

/// A request to execute one stage unit for one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchMessage {
    /// Unique message id (UUID). Redeliveries keep the same id.
    pub id: String,
    pub task_id: String,
    /// Stage epoch of the task when this unit was dispatched.
    pub expected_version: u64,
    pub stage: Stage,
    /// Set for per-slide stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_index: Option<u32>,
    /// Attempt number this dispatch represents (1-indexed).
    pub attempt: u32,
    /// The result must arrive before this instant.
    pub deadline: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

impl DispatchMessage {
    pub fn new(
        task_id: impl Into<String>,
        expected_version: u64,
        stage: Stage,
        slide_index: Option<u32>,
        attempt: u32,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            expected_version,
            stage,
            slide_index,
            attempt,
            deadline,
            enqueued_at: Utc::now(),
        }
    }

    /// Short label used in logs, e.g. `content[2]#1`.
    pub fn unit_label(&self) -> String {
        match self.slide_index {
            Some(index) => format!("{}[{}]#{}", self.stage, index, self.attempt),
            None => format!("{}#{}", self.stage, self.attempt),
        }
    }
}

/// Errors from the dispatch queue.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("Dispatch queue is closed")]
    Closed,
}
