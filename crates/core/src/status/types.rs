//! Read-only views of task state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{ArtifactError, ArtifactRef};
use crate::task::{
    Progress, Slide, SlideSpec, Stage, Task, TaskError, TaskFailure, TaskStatus,
};

/// Errors returned by the status facade.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("task not found: {0}")]
    NotFound(String),

    /// The task exists but has no downloadable result yet.
    #[error("task {task_id} is not ready (status {status})")]
    NotReady { task_id: String, status: TaskStatus },

    #[error("compiled deck missing for task {0}")]
    ArtifactMissing(String),

    #[error("compiled deck for task {0} failed checksum verification")]
    ChecksumMismatch(String),

    #[error("task store error: {0}")]
    Store(#[from] TaskError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// One slide as shown to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlideView {
    pub index: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_notes: Option<String>,
    /// Pass this back as the expected version when editing.
    pub edit_version: u64,
}

impl From<&Slide> for SlideView {
    fn from(slide: &Slide) -> Self {
        Self {
            index: slide.index,
            title: slide.title.clone(),
            content: slide.content.clone(),
            image_ref: slide.image_ref.clone(),
            speaker_notes: slide.speaker_notes.clone(),
            edit_version: slide.edit_version,
        }
    }
}

/// Status of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusView {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: Progress,
    /// Latest checkpoint reached (`OUTLINE_READY`, `CONTENT_READY`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline: Option<Vec<SlideSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slides: Option<Vec<SlideView>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    /// Whether an unexpired edit lock is held.
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StatusView {
    pub fn from_task(task: &Task, now: DateTime<Utc>) -> Self {
        // A failed task reports the checkpoint it had reached.
        let checkpoint = match (task.status, task.transitions.last()) {
            (TaskStatus::Failed, Some(last)) => last.from.checkpoint(),
            (status, _) => status.checkpoint(),
        };
        let locked = task.lock_is_active(now);

        Self {
            task_id: task.id.clone(),
            status: task.status,
            progress: task.progress(),
            checkpoint,
            outline: task.outline.clone(),
            slides: (!task.slides.is_empty())
                .then(|| task.slides.iter().map(SlideView::from).collect()),
            error: task.error.clone(),
            locked,
            lock_expires_at: task.lock_expires_at.filter(|_| locked),
            version: task.version,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Location of a completed deck.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultView {
    pub task_id: String,
    pub artifact: ArtifactRef,
    pub slide_count: usize,
}

/// Coarse state of one stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

/// Progress of one stage across its units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageStatus {
    pub stage: Stage,
    pub state: StageState,
    pub completed_units: usize,
    pub total_units: usize,
    /// Highest attempt number among the stage's units.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Per-stage breakdown of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageBreakdown {
    pub task_id: String,
    pub status: TaskStatus,
    pub stages: Vec<StageStatus>,
}

impl StageBreakdown {
    pub fn from_task(task: &Task) -> Self {
        let failed_stage = task
            .error
            .as_ref()
            .filter(|_| task.status == TaskStatus::Failed)
            .and_then(|e| e.stage);

        let stages = Stage::ALL
            .iter()
            .map(|&stage| {
                let units: Vec<_> = task
                    .phase_units(stage.phase())
                    .into_iter()
                    .filter(|(s, _)| *s == stage)
                    .filter_map(|(s, index)| task.unit(s, index))
                    .collect();

                let total_units = units.len();
                let completed_units = units.iter().filter(|u| u.done).count();
                let attempts = units.iter().map(|u| u.attempts).max().unwrap_or(0);
                let last_error = units.iter().find_map(|u| u.last_error.clone());

                let state = if failed_stage == Some(stage) {
                    StageState::Failed
                } else if total_units > 0 && completed_units == total_units {
                    StageState::Completed
                } else if attempts > 0 {
                    StageState::InProgress
                } else {
                    StageState::NotStarted
                };

                StageStatus {
                    stage,
                    state,
                    completed_units,
                    total_units,
                    attempts,
                    last_error,
                }
            })
            .collect();

        Self {
            task_id: task.id.clone(),
            status: task.status,
            stages,
        }
    }
}

/// One row of a task listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSummary {
    pub task_id: String,
    pub topic: String,
    pub status: TaskStatus,
    pub progress: Progress,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            topic: task.request.topic.clone(),
            status: task.status,
            progress: task.progress(),
            created_by: task.created_by.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}
