//! Edit sessions on completed presentations.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::runner::Orchestrator;
use super::types::OrchestratorError;
use crate::artifact::ArtifactRef;
use crate::lock::{LockError, LockLease, SlideEdits};
use crate::metrics;
use crate::stage::{StageError, StageOutput};
use crate::task::{Stage, Task, TaskError, ValidationError};

/// How a slide edit is authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditLock {
    /// Take a short-lived lock for this edit only, then release it.
    Implicit,
    /// Use a lock the caller already holds.
    Held(String),
}

impl Orchestrator {
    /// Acquire the edit lock on a completed task.
    pub fn acquire_lock(
        &self,
        task_id: &str,
        token: &str,
        ttl: Option<Duration>,
    ) -> Result<LockLease, OrchestratorError> {
        Ok(self.locks.acquire(task_id, token, ttl)?)
    }

    /// Release the edit lock held by `token`, rebuilding the deck first if
    /// slides changed under the lock.
    ///
    /// A rebuild that cannot succeed moves the task to `FAILED`.
    pub async fn release_lock(&self, task_id: &str, token: &str) -> Result<Task, OrchestratorError> {
        for attempt in 1..=self.config.max_commit_attempts.max(1) {
            let snapshot = self.locks.begin_release(task_id, token)?;

            let compiled = if snapshot.edits_uncompiled {
                match self.recompile(&snapshot).await {
                    Ok(artifact) => Some(artifact),
                    Err(message) => {
                        self.locks.fail_release(task_id, token, &message)?;
                        return Err(OrchestratorError::EditFailed(message));
                    }
                }
            } else {
                None
            };

            match self.locks.complete_release(task_id, snapshot.version, compiled) {
                Ok(task) => return Ok(task),
                // Edited or renewed since the snapshot; rebuild from the new state.
                Err(LockError::Store(TaskError::VersionConflict { .. })) => {
                    debug!(task_id = %task_id, attempt, "Task changed during release, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrchestratorError::VersionConflict(task_id.to_string()))
    }

    /// Change one slide.
    ///
    /// `expected_edit_version` is the slide's edit version as last seen by
    /// the caller; a stale value fails with `Conflict` and changes nothing.
    /// Returns the slide's new edit version.
    pub async fn modify_slide(
        &self,
        task_id: &str,
        slide_index: u32,
        edits: &SlideEdits,
        expected_edit_version: u64,
        lock: EditLock,
    ) -> Result<u64, OrchestratorError> {
        let token = match lock {
            EditLock::Held(token) => {
                return Ok(self.locks.edit_slide(
                    task_id,
                    &token,
                    slide_index,
                    edits,
                    expected_edit_version,
                )?);
            }
            EditLock::Implicit => format!("implicit-{}", uuid::Uuid::new_v4()),
        };

        if edits.is_empty() {
            return Err(ValidationError::single("edits", "no changes given").into());
        }

        // Refuse stale or impossible edits before touching the lock.
        let task = self
            .store
            .get(task_id)?
            .ok_or_else(|| OrchestratorError::NotFound(task_id.to_string()))?;
        if task.status.is_generating() {
            return Err(OrchestratorError::LockUnavailable(
                "generation in progress".to_string(),
            ));
        }
        let slide = task
            .slide(slide_index)
            .ok_or_else(|| OrchestratorError::SlideNotFound {
                task_id: task_id.to_string(),
                slide_index,
            })?;
        if slide.edit_version != expected_edit_version {
            metrics::SLIDE_EDITS.with_label_values(&["conflict"]).inc();
            return Err(OrchestratorError::Conflict {
                slide_index,
                expected: expected_edit_version,
                actual: slide.edit_version,
            });
        }

        let ttl = Duration::from_secs(self.locks.config().implicit_ttl_secs);
        self.locks.acquire(task_id, &token, Some(ttl))?;

        let edited = self
            .locks
            .edit_slide(task_id, &token, slide_index, edits, expected_edit_version);
        let released = self.release_lock(task_id, &token).await;

        let edit_version = edited?;
        match released {
            Ok(_) => {}
            // The implicit lock lapsed during the rebuild and another editor
            // took the task over. The edit is stored and their release
            // rebuilds the deck.
            Err(e @ OrchestratorError::LockUnavailable(_))
            | Err(e @ OrchestratorError::InvalidState { .. }) => {
                warn!(
                    task_id = %task_id,
                    slide_index,
                    edit_version,
                    "Implicit lock lapsed before release, edit kept: {}",
                    e
                );
            }
            Err(e) => return Err(e),
        }
        info!(task_id = %task_id, slide_index, edit_version, "Slide modified");
        Ok(edit_version)
    }

    /// Rebuild the deck for an edited task, retrying transient failures.
    async fn recompile(&self, task: &Task) -> Result<ArtifactRef, String> {
        let executor = self
            .executors
            .get(Stage::Compile)
            .ok_or_else(|| "no executor for compile stage".to_string())?;
        let retry = &self.config.retry;

        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(self.config.stage_timeout(), executor.execute(task, None))
                .await
                .unwrap_or_else(|_| {
                    Err(StageError::Retryable("compile stage missed its deadline".to_string()))
                });

            match result {
                Ok(StageOutput::Compiled(artifact)) => return Ok(artifact),
                Ok(other) => {
                    return Err(format!("compile executor returned {} output", other.stage()))
                }
                Err(StageError::Retryable(e)) if retry.can_retry(attempt) => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        task_id = %task.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Recompile failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(format!(
                        "rebuilding deck failed after {} attempts: {}",
                        attempt,
                        e.message()
                    ))
                }
            }
        }
    }
}
