//! SQLite-backed persistence for scheduled tasks and their execution logs.
//! Survives restarts; one connection guarded by a mutex, only ever locked
//! on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{ExecutionLogRepository, TaskRepository};
use cadence_core::types::{
    ExecutionLog, ExecutionOutcome, NewExecutionLog, NewTask, Page, TaskDefinition, TaskFilter,
    TaskId, TaskPatch, TaskStatus,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

const TASK_COLUMNS: &str = "id, name, description, cron_expression, task_type, task_params, exec_type, status, last_execute_time, next_execute_time, created_at, updated_at";

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> CadenceError + '_ {
    move |e| CadenceError::Repository(format!("{context}: {e}"))
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskDefinition> {
    let status: String = row.get(7)?;
    let exec_type: String = row.get(6)?;
    let last: Option<String> = row.get(8)?;
    let next: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(TaskDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        cron_expression: row.get(3)?,
        task_type: row.get(4)?,
        params: row.get(5)?,
        exec_type: exec_type.parse().unwrap_or_default(),
        // Unknown statuses never get a trigger.
        status: status.parse().unwrap_or(TaskStatus::Disabled),
        last_execute_time: last.as_deref().and_then(parse_time),
        next_execute_time: next.as_deref().and_then(parse_time),
        created_at: parse_time(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_time(&updated_at).unwrap_or_else(Utc::now),
    })
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionLog> {
    let execute_time: String = row.get(2)?;
    let outcome: String = row.get(3)?;
    let duration_ms: i64 = row.get(4)?;
    Ok(ExecutionLog {
        id: row.get(0)?,
        task_id: row.get(1)?,
        execute_time: parse_time(&execute_time).unwrap_or_else(Utc::now),
        outcome: outcome.parse().unwrap_or(ExecutionOutcome::Failure),
        duration_ms: duration_ms.max(0) as u64,
        error_message: row.get(5)?,
    })
}

/// SQLite store implementing both repository traits.
pub struct SchedulerDb {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("DB open"))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("DB open"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                cron_expression TEXT NOT NULL,
                task_type TEXT NOT NULL,
                task_params TEXT NOT NULL DEFAULT '',   -- opaque JSON, executor-specific
                exec_type TEXT NOT NULL DEFAULT 'recurring',
                status TEXT NOT NULL DEFAULT 'enabled',
                last_execute_time TEXT,
                next_execute_time TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_status ON scheduled_tasks(status);

            CREATE TABLE IF NOT EXISTS task_execution_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                execute_time TEXT NOT NULL,
                outcome TEXT NOT NULL,          -- 'success' | 'failure'
                duration_ms INTEGER NOT NULL,
                error_message TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_task_execution_logs_task ON task_execution_logs(task_id, id);
         ",
            )
            .map_err(db_err("Migration"))
    }

    /// Run `op` against the connection on tokio's blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || op(&conn.lock()))
            .await
            .map_err(|e| CadenceError::Repository(format!("DB worker failed: {e}")))?
    }

    fn fetch_task(conn: &Connection, id: TaskId) -> Result<TaskDefinition> {
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
            params![id],
            row_to_task,
        )
        .optional()
        .map_err(db_err("Get task"))?
        .ok_or(CadenceError::NotFound(id))
    }
}

#[async_trait]
impl TaskRepository for SchedulerDb {
    async fn create(&self, task: NewTask) -> Result<TaskDefinition> {
        self.run(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO scheduled_tasks
                 (name, description, cron_expression, task_type, task_params, exec_type, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    task.name,
                    task.description,
                    task.cron_expression,
                    task.task_type,
                    task.params,
                    task.exec_type.as_str(),
                    task.status.as_str(),
                    now,
                ],
            )
            .map_err(db_err("Create task"))?;
            Self::fetch_task(conn, conn.last_insert_rowid())
        })
        .await
    }

    async fn get_by_id(&self, id: TaskId) -> Result<TaskDefinition> {
        self.run(move |conn| Self::fetch_task(conn, id)).await
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskDefinition> {
        self.run(move |conn| {
            let mut task = Self::fetch_task(conn, id)?;
            task.apply(&patch);
            conn.execute(
                "UPDATE scheduled_tasks
                 SET status = ?2, last_execute_time = ?3, next_execute_time = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    id,
                    task.status.as_str(),
                    task.last_execute_time.map(|t| t.to_rfc3339()),
                    task.next_execute_time.map(|t| t.to_rfc3339()),
                    task.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err("Update task"))?;
            Ok(task)
        })
        .await
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        self.run(move |conn| {
            let deleted = conn
                .execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])
                .map_err(db_err("Delete task"))?;
            if deleted == 0 {
                return Err(CadenceError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn search_paginated(&self, filter: &TaskFilter) -> Result<Page<TaskDefinition>> {
        let filter = filter.clone();
        self.run(move |conn| {
            let status = filter.status.map(|s| s.as_str());

            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM scheduled_tasks WHERE (?1 IS NULL OR status = ?1)",
                    params![status],
                    |row| row.get(0),
                )
                .map_err(db_err("Count tasks"))?;

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM scheduled_tasks
                     WHERE (?1 IS NULL OR status = ?1)
                     ORDER BY id LIMIT ?2 OFFSET ?3"
                ))
                .map_err(db_err("Search tasks"))?;
            let items = stmt
                .query_map(
                    params![status, filter.page_size as i64, filter.offset() as i64],
                    row_to_task,
                )
                .map_err(db_err("Search tasks"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("Search tasks"))?;

            Ok(Page {
                items,
                total: total.max(0) as usize,
                page: filter.page,
                page_size: filter.page_size,
            })
        })
        .await
    }
}

#[async_trait]
impl ExecutionLogRepository for SchedulerDb {
    async fn create(&self, log: NewExecutionLog) -> Result<ExecutionLog> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO task_execution_logs (task_id, execute_time, outcome, duration_ms, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    log.task_id,
                    log.execute_time.to_rfc3339(),
                    log.outcome.as_str(),
                    log.duration_ms as i64,
                    log.error_message,
                ],
            )
            .map_err(db_err("Create log"))?;
            Ok(ExecutionLog::from_new(conn.last_insert_rowid(), log))
        })
        .await
    }

    async fn list_for_task(&self, task_id: TaskId, limit: usize) -> Result<Vec<ExecutionLog>> {
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, task_id, execute_time, outcome, duration_ms, error_message
                     FROM task_execution_logs WHERE task_id = ?1 ORDER BY id DESC LIMIT ?2",
                )
                .map_err(db_err("List logs"))?;
            stmt.query_map(params![task_id, limit as i64], row_to_log)
                .map_err(db_err("List logs"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err("List logs"))
        })
        .await
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        // RFC 3339 strings in UTC compare lexicographically.
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM task_execution_logs WHERE execute_time < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(db_err("Purge logs"))
        })
        .await
    }
}
