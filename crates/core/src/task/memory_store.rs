//! In-memory task store.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use super::store::{Mutator, TaskError, TaskFilter, TaskStore};
use super::types::Task;

/// Task store kept entirely in memory. Used for tests and for
/// `database.backend = "memory"`.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(&self, filter: &TaskFilter) -> Vec<Task> {
        let tasks = self.tasks.read().unwrap();
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matching
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, task: &Task) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().unwrap();
        if tasks.contains_key(&task.id) {
            return Err(TaskError::AlreadyExists(task.id.clone()));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Task>, TaskError> {
        Ok(self.tasks.read().unwrap().get(id).cloned())
    }

    fn conditional_update(
        &self,
        id: &str,
        expected_version: u64,
        mutator: &mut Mutator<'_>,
    ) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().unwrap();
        let stored = tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;

        if stored.version != expected_version {
            return Err(TaskError::VersionConflict {
                task_id: id.to_string(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        let mut next = stored.clone();
        mutator(&mut next)?;
        next.id = id.to_string();
        next.version = expected_version + 1;
        next.updated_at = Utc::now();

        *stored = next.clone();
        Ok(next)
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        let offset = filter.offset.max(0) as usize;
        let limit = filter.limit.max(0) as usize;
        Ok(self
            .sorted(filter)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn count(&self, filter: &TaskFilter) -> Result<i64, TaskError> {
        let tasks = self.tasks.read().unwrap();
        Ok(tasks.values().filter(|task| filter.matches(task)).count() as i64)
    }
}
