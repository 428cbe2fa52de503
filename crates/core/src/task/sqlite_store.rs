//! SQLite-backed task store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::store::{Mutator, TaskError, TaskFilter, TaskStore};
use super::types::Task;

/// SQLite-backed task store.
///
/// Each task is one row keyed by id; the full record (slides embedded) is
/// stored as JSON next to the indexed `status` and `version` columns.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Create a new SQLite task store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TaskError> {
        let conn = Connection::open(path).map_err(|e| TaskError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite task store (useful for testing).
    pub fn in_memory() -> Result<Self, TaskError> {
        let conn =
            Connection::open_in_memory().map_err(|e| TaskError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TaskError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_by TEXT NOT NULL,
                record TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);
            "#,
        )
        .map_err(|e| TaskError::Database(e.to_string()))?;

        Ok(())
    }

    fn build_where_clause(filter: &TaskFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            conditions.push(format!("status IN ({})", placeholders));
            for status in &filter.statuses {
                params.push(Box::new(status.as_str()));
            }
        }

        if let Some(ref created_by) = filter.created_by {
            conditions.push("created_by = ?".to_string());
            params.push(Box::new(created_by.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn decode(record: &str) -> Result<Task, TaskError> {
        serde_json::from_str(record).map_err(|e| TaskError::Serialization(e.to_string()))
    }

    fn encode(task: &Task) -> Result<String, TaskError> {
        serde_json::to_string(task).map_err(|e| TaskError::Serialization(e.to_string()))
    }
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, task: &Task) -> Result<(), TaskError> {
        let conn = self.conn.lock().unwrap();
        let record = Self::encode(task)?;

        let result = conn.execute(
            "INSERT INTO tasks (id, status, version, created_by, record, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                task.id,
                task.status.as_str(),
                task.version as i64,
                task.created_by,
                record,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(TaskError::AlreadyExists(task.id.clone()))
            }
            Err(e) => Err(TaskError::Database(e.to_string())),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();

        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM tasks WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TaskError::Database(e.to_string()))?;

        record.as_deref().map(Self::decode).transpose()
    }

    fn conditional_update(
        &self,
        id: &str,
        expected_version: u64,
        mutator: &mut Mutator<'_>,
    ) -> Result<Task, TaskError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| TaskError::Database(e.to_string()))?;

        let record: Option<String> = tx
            .query_row(
                "SELECT record FROM tasks WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TaskError::Database(e.to_string()))?;

        let mut task = match record {
            Some(record) => Self::decode(&record)?,
            None => return Err(TaskError::NotFound(id.to_string())),
        };

        if task.version != expected_version {
            return Err(TaskError::VersionConflict {
                task_id: id.to_string(),
                expected: expected_version,
                actual: task.version,
            });
        }

        mutator(&mut task)?;
        task.id = id.to_string();
        task.version = expected_version + 1;
        task.updated_at = Utc::now();

        let updated = tx
            .execute(
                "UPDATE tasks SET status = ?, version = ?, record = ?, updated_at = ? WHERE id = ? AND version = ?",
                params![
                    task.status.as_str(),
                    task.version as i64,
                    Self::encode(&task)?,
                    task.updated_at.to_rfc3339(),
                    id,
                    expected_version as i64,
                ],
            )
            .map_err(|e| TaskError::Database(e.to_string()))?;

        if updated != 1 {
            return Err(TaskError::VersionConflict {
                task_id: id.to_string(),
                expected: expected_version,
                actual: task.version,
            });
        }

        tx.commit().map_err(|e| TaskError::Database(e.to_string()))?;
        Ok(task)
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT record FROM tasks {} ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TaskError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))
            .map_err(|e| TaskError::Database(e.to_string()))?;

        let mut tasks = Vec::new();
        for row_result in rows {
            let record = row_result.map_err(|e| TaskError::Database(e.to_string()))?;
            tasks.push(Self::decode(&record)?);
        }

        Ok(tasks)
    }

    fn count(&self, filter: &TaskFilter) -> Result<i64, TaskError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM tasks {}", where_clause);

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count: i64 = conn
            .query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| TaskError::Database(e.to_string()))?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::types::TaskStatus;
    use crate::testing::fixtures;

    fn create_test_store() -> SqliteTaskStore {
        SqliteTaskStore::in_memory().unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let store = create_test_store();
        let task = fixtures::task("Abbey Road", 4);

        store.create(&task).unwrap();
        let fetched = store.get(&task.id).unwrap().unwrap();

        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.request, task.request);
        assert_eq!(fetched.status, TaskStatus::Created);
        assert_eq!(fetched.version, 1);
    }

    #[test]
    fn test_get_missing() {
        let store = create_test_store();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_create_duplicate_fails() {
        let store = create_test_store();
        let task = fixtures::task("Duplicate", 2);
        store.create(&task).unwrap();

        let err = store.create(&task).unwrap_err();
        assert_eq!(err, TaskError::AlreadyExists(task.id.clone()));
    }

    #[test]
    fn test_conditional_update_bumps_version() {
        let store = create_test_store();
        let task = fixtures::task("CAS", 2);
        store.create(&task).unwrap();

        let updated = store
            .conditional_update(&task.id, 1, &mut |t| {
                t.status = TaskStatus::OutlinePending;
                Ok(())
            })
            .unwrap();

        assert_eq!(updated.version, 2);
        assert!(updated.updated_at >= task.updated_at);

        let fetched = store.get(&task.id).unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::OutlinePending);
        assert_eq!(fetched.version, 2);
    }

    #[test]
    fn test_conditional_update_stale_version_rejected() {
        let store = create_test_store();
        let task = fixtures::task("CAS", 2);
        store.create(&task).unwrap();
        store
            .conditional_update(&task.id, 1, &mut |t| {
                t.status = TaskStatus::OutlinePending;
                Ok(())
            })
            .unwrap();

        let mut called = false;
        let err = store
            .conditional_update(&task.id, 1, &mut |t| {
                called = true;
                t.status = TaskStatus::Failed;
                Ok(())
            })
            .unwrap_err();

        assert!(!called);
        assert_eq!(
            err,
            TaskError::VersionConflict {
                task_id: task.id.clone(),
                expected: 1,
                actual: 2,
            }
        );
        let fetched = store.get(&task.id).unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::OutlinePending);
    }

    #[test]
    fn test_conditional_update_mutator_error_leaves_record() {
        let store = create_test_store();
        let task = fixtures::task("CAS", 2);
        store.create(&task).unwrap();

        let err = store
            .conditional_update(&task.id, 1, &mut |t| {
                t.status = TaskStatus::Failed;
                Err(TaskError::InvalidTransition {
                    from: TaskStatus::Created,
                    to: TaskStatus::Completed,
                })
            })
            .unwrap_err();

        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        let fetched = store.get(&task.id).unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Created);
        assert_eq!(fetched.version, 1);
    }

    #[test]
    fn test_conditional_update_missing_task() {
        let store = create_test_store();
        let err = store
            .conditional_update("missing", 1, &mut |_| Ok(()))
            .unwrap_err();
        assert_eq!(err, TaskError::NotFound("missing".to_string()));
    }

    #[test]
    fn test_list_and_count_by_status() {
        let store = create_test_store();
        let first = fixtures::task("First", 2);
        let second = fixtures::task("Second", 2);
        store.create(&first).unwrap();
        store.create(&second).unwrap();
        store
            .conditional_update(&second.id, 1, &mut |t| {
                t.status = TaskStatus::Failed;
                Ok(())
            })
            .unwrap();

        let all = store.list(&TaskFilter::new()).unwrap();
        assert_eq!(all.len(), 2);

        let failed_filter = TaskFilter::new().with_status(TaskStatus::Failed);
        let failed = store.list(&failed_filter).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, second.id);
        assert_eq!(store.count(&failed_filter).unwrap(), 1);

        let either = TaskFilter::new().with_statuses([TaskStatus::Created, TaskStatus::Failed]);
        assert_eq!(store.count(&either).unwrap(), 2);
    }

    #[test]
    fn test_list_pagination() {
        let store = create_test_store();
        for i in 0..5 {
            store.create(&fixtures::task(&format!("Topic {}", i), 2)).unwrap();
        }

        let page = store
            .list(&TaskFilter::new().with_limit(2).with_offset(2))
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(store.count(&TaskFilter::new()).unwrap(), 5);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let task = fixtures::task("Durable", 3);

        {
            let store = SqliteTaskStore::new(&path).unwrap();
            store.create(&task).unwrap();
        }

        let store = SqliteTaskStore::new(&path).unwrap();
        let fetched = store.get(&task.id).unwrap().unwrap();
        assert_eq!(fetched.request.topic, "Durable");
    }
}
