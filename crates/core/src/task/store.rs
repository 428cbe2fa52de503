//! Task storage trait and compare-and-swap helpers.

use thiserror::Error;

use super::types::{Task, TaskStatus};

/// Error type for task store operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task already exists: {0}")]
    AlreadyExists(String),

    #[error("Version conflict on task {task_id}: expected {expected}, found {actual}")]
    VersionConflict {
        task_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Filter for querying tasks.
#[derive(Debug, Clone)]
pub struct TaskFilter {
    /// Only tasks in one of these statuses (empty = any).
    pub statuses: Vec<TaskStatus>,
    /// Filter by creator.
    pub created_by: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            statuses: Vec::new(),
            created_by: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by a single status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Filter by any of several statuses.
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        self.statuses.extend(statuses);
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Returns true if the task passes the filter (ignores paging).
    pub fn matches(&self, task: &Task) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&task.status))
            && self
                .created_by
                .as_ref()
                .map_or(true, |creator| *creator == task.created_by)
    }
}

/// Mutator applied by [`TaskStore::conditional_update`].
pub type Mutator<'a> = dyn FnMut(&mut Task) -> Result<(), TaskError> + 'a;

/// Trait for task storage backends.
///
/// Every mutation goes through `conditional_update`; the store owns the
/// `version` and `updated_at` fields and sets them after the mutator runs.
pub trait TaskStore: Send + Sync {
    /// Persist a new task. Fails with `AlreadyExists` if the id is taken.
    fn create(&self, task: &Task) -> Result<(), TaskError>;

    /// Get a task by ID.
    fn get(&self, id: &str) -> Result<Option<Task>, TaskError>;

    /// Apply `mutator` and persist iff the stored version equals
    /// `expected_version`. Returns the persisted task with `version`
    /// set to `expected_version + 1`.
    fn conditional_update(
        &self,
        id: &str,
        expected_version: u64,
        mutator: &mut Mutator<'_>,
    ) -> Result<Task, TaskError>;

    /// List tasks matching the filter, oldest first.
    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError>;

    /// Count tasks matching the filter.
    fn count(&self, filter: &TaskFilter) -> Result<i64, TaskError>;
}

/// Decision returned by a planning closure passed to [`update_with_retry`].
#[derive(Debug)]
pub enum Plan<R> {
    /// Persist the mutated task.
    Write(R),
    /// Leave the stored task untouched.
    Skip(R),
}

/// Result of [`update_with_retry`].
#[derive(Debug)]
pub struct Updated<R> {
    /// The task as persisted (or as read, when skipped).
    pub task: Task,
    pub value: R,
    /// Whether a write happened.
    pub written: bool,
}

/// Read-modify-write loop over `conditional_update`.
///
/// `plan` gets a fresh copy of the stored task on every attempt and may
/// mutate it; returning `Plan::Write` persists the copy if nobody else wrote
/// in between. Version conflicts re-read and re-plan up to `max_attempts`
/// times, after which the last conflict is returned.
pub fn update_with_retry<R, E, F>(
    store: &dyn TaskStore,
    id: &str,
    max_attempts: u32,
    mut plan: F,
) -> Result<Updated<R>, E>
where
    E: From<TaskError>,
    F: FnMut(&mut Task) -> Result<Plan<R>, E>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let current = store
            .get(id)?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;

        let mut next = current.clone();
        let value = match plan(&mut next)? {
            Plan::Skip(value) => {
                return Ok(Updated {
                    task: current,
                    value,
                    written: false,
                })
            }
            Plan::Write(value) => value,
        };

        let mut apply = |task: &mut Task| -> Result<(), TaskError> {
            *task = next.clone();
            Ok(())
        };
        match store.conditional_update(id, current.version, &mut apply) {
            Ok(task) => {
                return Ok(Updated {
                    task,
                    value,
                    written: true,
                })
            }
            Err(TaskError::VersionConflict { .. }) if attempt < max_attempts.max(1) => {
                tracing::debug!(task_id = %id, attempt, "Version conflict, re-reading task");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
