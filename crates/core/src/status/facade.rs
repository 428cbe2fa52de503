//! Status and download facade.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::types::{ResultView, StageBreakdown, StatusError, StatusView, TaskSummary};
use crate::artifact::{ArtifactRef, ArtifactStore};
use crate::task::{Task, TaskFilter, TaskStatus, TaskStore};

/// Read-only access to task state and compiled decks.
#[derive(Clone)]
pub struct StatusFacade {
    store: Arc<dyn TaskStore>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl StatusFacade {
    pub fn new(store: Arc<dyn TaskStore>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { store, artifacts }
    }

    fn load(&self, task_id: &str) -> Result<Task, StatusError> {
        self.store
            .get(task_id)?
            .ok_or_else(|| StatusError::NotFound(task_id.to_string()))
    }

    /// Current status, progress and slides of a task.
    pub fn get_status(&self, task_id: &str) -> Result<StatusView, StatusError> {
        let task = self.load(task_id)?;
        Ok(StatusView::from_task(&task, Utc::now()))
    }

    /// Per-stage breakdown of a task.
    pub fn get_stage_status(&self, task_id: &str) -> Result<StageBreakdown, StatusError> {
        let task = self.load(task_id)?;
        Ok(StageBreakdown::from_task(&task))
    }

    /// Artifact reference of a completed deck.
    ///
    /// Fails with `NotReady` unless the task is `COMPLETED`.
    pub async fn get_result(&self, task_id: &str) -> Result<ResultView, StatusError> {
        let task = self.load(task_id)?;
        if task.status != TaskStatus::Completed {
            return Err(StatusError::NotReady {
                task_id: task.id,
                status: task.status,
            });
        }

        let artifact = task
            .compiled_location
            .clone()
            .ok_or_else(|| StatusError::ArtifactMissing(task.id.clone()))?;
        if !self.artifacts.exists(&artifact.key).await? {
            warn!(task_id = %task.id, key = %artifact.key, "Compiled deck missing from store");
            return Err(StatusError::ArtifactMissing(task.id));
        }

        Ok(ResultView {
            task_id: task.id,
            artifact,
            slide_count: task.slides.len(),
        })
    }

    /// Read a completed deck, verifying its checksum.
    pub async fn download(&self, task_id: &str) -> Result<(ArtifactRef, Vec<u8>), StatusError> {
        let result = self.get_result(task_id).await?;
        let bytes = self.artifacts.get(&result.artifact.key).await?;
        if !result.artifact.verify(&bytes) {
            warn!(task_id = %task_id, key = %result.artifact.key, "Checksum mismatch on download");
            return Err(StatusError::ChecksumMismatch(task_id.to_string()));
        }
        debug!(task_id = %task_id, size_bytes = bytes.len(), "Deck downloaded");
        Ok((result.artifact, bytes))
    }

    /// List tasks matching `filter`, oldest first.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>, StatusError> {
        let tasks = self.store.list(filter)?;
        Ok(tasks.iter().map(TaskSummary::from).collect())
    }
}
