//! Exclusive edit access to completed presentations.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{LockConfig, LockError, LockLease, SlideEdits};
use crate::artifact::ArtifactRef;
use crate::metrics;
use crate::task::{
    update_with_retry, FailureKind, Plan, Stage, Task, TaskFailure, TaskStatus, TaskStore,
};

/// Grants and checks edit locks. Every change goes through the task
/// store's conditional update, so the lock is as durable as the task.
pub struct LockManager {
    store: Arc<dyn TaskStore>,
    config: LockConfig,
    max_commit_attempts: u32,
}

impl LockManager {
    pub fn new(store: Arc<dyn TaskStore>, config: LockConfig, max_commit_attempts: u32) -> Self {
        Self {
            store,
            config,
            max_commit_attempts,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Result<Duration, LockError> {
        let ttl = ttl.unwrap_or(Duration::from_secs(self.config.default_ttl_secs));
        if ttl.is_zero() {
            return Err(LockError::InvalidEdit("lock ttl must be positive".to_string()));
        }
        Ok(ttl.min(Duration::from_secs(self.config.max_ttl_secs)))
    }

    /// Check that `token` holds an unexpired lock on `task`.
    fn check_holder(task: &Task, token: &str, operation: &str) -> Result<(), LockError> {
        if task.status != TaskStatus::Editing {
            return Err(if task.status.is_generating() {
                LockError::Unavailable {
                    task_id: task.id.clone(),
                    reason: "generation in progress".to_string(),
                }
            } else {
                LockError::InvalidState {
                    task_id: task.id.clone(),
                    status: task.status,
                    operation: operation.to_string(),
                }
            });
        }
        if task.lock_token.as_deref() != Some(token) {
            return Err(LockError::Unavailable {
                task_id: task.id.clone(),
                reason: "lock held by another editor".to_string(),
            });
        }
        Ok(())
    }

    /// Acquire the edit lock on a completed task.
    ///
    /// Succeeds from `COMPLETED`, or from `EDITING` when the current lock has
    /// expired or is already held by `token` (which renews it).
    pub fn acquire(
        &self,
        task_id: &str,
        token: &str,
        ttl: Option<Duration>,
    ) -> Result<LockLease, LockError> {
        if token.trim().is_empty() {
            return Err(LockError::InvalidEdit("lock token must not be empty".to_string()));
        }
        let ttl = self.effective_ttl(ttl)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| LockError::InvalidEdit(format!("lock ttl out of range: {}", e)))?;

        let result = update_with_retry(self.store.as_ref(), task_id, self.max_commit_attempts, |task| {
            let now = Utc::now();
            match task.status {
                TaskStatus::Completed => {
                    task.record_transition(TaskStatus::Editing, now)?;
                }
                TaskStatus::Editing => {
                    let held_by_other = task.lock_is_active(now)
                        && task.lock_token.as_deref() != Some(token);
                    if held_by_other {
                        return Err(LockError::Unavailable {
                            task_id: task.id.clone(),
                            reason: "lock held by another editor".to_string(),
                        });
                    }
                }
                status if status.is_generating() => {
                    return Err(LockError::Unavailable {
                        task_id: task.id.clone(),
                        reason: "generation in progress".to_string(),
                    });
                }
                status => {
                    return Err(LockError::InvalidState {
                        task_id: task.id.clone(),
                        status,
                        operation: "lock".to_string(),
                    });
                }
            }
            let expires_at = now + ttl;
            task.lock_token = Some(token.to_string());
            task.lock_expires_at = Some(expires_at);
            Ok(Plan::Write(expires_at))
        });

        match result {
            Ok(updated) => {
                metrics::LOCK_ACQUISITIONS.with_label_values(&["granted"]).inc();
                info!(task_id = %task_id, expires_at = %updated.value, "Edit lock granted");
                Ok(LockLease {
                    task_id: task_id.to_string(),
                    token: token.to_string(),
                    expires_at: updated.value,
                    version: updated.task.version,
                })
            }
            Err(e) => {
                if matches!(e, LockError::Unavailable { .. }) {
                    metrics::LOCK_ACQUISITIONS
                        .with_label_values(&["unavailable"])
                        .inc();
                }
                debug!(task_id = %task_id, error = %e, "Edit lock refused");
                Err(e)
            }
        }
    }

    /// Validate a release request and return the task snapshot to recompile
    /// from.
    pub fn begin_release(&self, task_id: &str, token: &str) -> Result<Task, LockError> {
        let task = self
            .store
            .get(task_id)?
            .ok_or_else(|| LockError::NotFound(task_id.to_string()))?;
        Self::check_holder(&task, token, "release")?;
        Ok(task)
    }

    /// Clear the lock and return to `COMPLETED`, iff the task is still at
    /// `snapshot_version` (so the lock checked by `begin_release` is
    /// unchanged). `compiled` replaces the deck when edits were recompiled.
    pub fn complete_release(
        &self,
        task_id: &str,
        snapshot_version: u64,
        compiled: Option<ArtifactRef>,
    ) -> Result<Task, LockError> {
        let mut compiled = compiled;
        let task = self
            .store
            .conditional_update(task_id, snapshot_version, &mut |task| {
                if let Some(artifact) = compiled.take() {
                    task.compiled_location = Some(artifact);
                    task.edits_uncompiled = false;
                }
                task.lock_token = None;
                task.lock_expires_at = None;
                task.record_transition(TaskStatus::Completed, Utc::now())
            })?;
        info!(task_id = %task_id, version = task.version, "Edit lock released");
        Ok(task)
    }

    /// Fail a task whose post-edit rebuild could not be completed.
    pub fn fail_release(&self, task_id: &str, token: &str, message: &str) -> Result<Task, LockError> {
        let updated = update_with_retry(self.store.as_ref(), task_id, self.max_commit_attempts, |task| {
            if task.status != TaskStatus::Editing || task.lock_token.as_deref() != Some(token) {
                return Ok::<_, LockError>(Plan::Skip(()));
            }
            task.mark_failed(
                TaskFailure::new(FailureKind::Edit, message).at_unit(Stage::Compile, None),
            )?;
            Ok(Plan::Write(()))
        })?;
        if updated.written {
            warn!(task_id = %task_id, error = %message, "Edit rebuild failed, task marked failed");
            metrics::TASKS_FINISHED
                .with_label_values(&[FailureKind::Edit.as_str()])
                .inc();
        }
        Ok(updated.task)
    }

    /// Apply `edits` to one slide under the lock held by `token`.
    ///
    /// `expected_edit_version` must match the slide's current edit version;
    /// a stale value is rejected with `Conflict` and nothing is written.
    /// Returns the slide's new edit version.
    pub fn edit_slide(
        &self,
        task_id: &str,
        token: &str,
        slide_index: u32,
        edits: &SlideEdits,
        expected_edit_version: u64,
    ) -> Result<u64, LockError> {
        if edits.is_empty() {
            return Err(LockError::InvalidEdit("no changes given".to_string()));
        }
        if edits.content.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(LockError::InvalidEdit("content must not be empty".to_string()));
        }

        let result = update_with_retry(self.store.as_ref(), task_id, self.max_commit_attempts, |task| {
            Self::check_holder(task, token, "edit")?;
            if !task.lock_is_active(Utc::now()) {
                return Err(LockError::Unavailable {
                    task_id: task.id.clone(),
                    reason: "lock expired".to_string(),
                });
            }

            let task_id = task.id.clone();
            let slide = task.slide_mut(slide_index).ok_or(LockError::SlideNotFound {
                task_id,
                slide_index,
            })?;
            if slide.edit_version != expected_edit_version {
                return Err(LockError::Conflict {
                    slide_index,
                    expected: expected_edit_version,
                    actual: slide.edit_version,
                });
            }

            if let Some(content) = &edits.content {
                slide.content = Some(content.clone());
            }
            if let Some(image_ref) = &edits.image_ref {
                slide.image_ref = Some(image_ref.clone()).filter(|r| !r.is_empty());
            }
            if let Some(notes) = &edits.speaker_notes {
                slide.speaker_notes = Some(notes.clone());
            }
            slide.edit_version += 1;
            let new_version = slide.edit_version;
            task.edits_uncompiled = true;
            Ok(Plan::Write(new_version))
        });

        match result {
            Ok(updated) => {
                metrics::SLIDE_EDITS.with_label_values(&["applied"]).inc();
                debug!(
                    task_id = %task_id,
                    slide_index,
                    edit_version = updated.value,
                    "Slide edited"
                );
                Ok(updated.value)
            }
            Err(e) => {
                let label = if matches!(e, LockError::Conflict { .. }) {
                    "conflict"
                } else {
                    "rejected"
                };
                metrics::SLIDE_EDITS.with_label_values(&[label]).inc();
                Err(e)
            }
        }
    }
}
