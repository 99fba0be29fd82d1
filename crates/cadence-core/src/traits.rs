//! Collaborator traits: the seams between the scheduler and the outside world.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    ExecutionLog, NewExecutionLog, NewTask, Page, TaskDefinition, TaskFilter, TaskId, TaskPatch,
};

/// An execution strategy: runs one task and reports success or failure.
///
/// Executors never write execution logs themselves; the scheduler owns
/// outcome bookkeeping.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    async fn execute(&self, task: &TaskDefinition) -> Result<()>;
}

/// Persistent storage of task definitions.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: NewTask) -> Result<TaskDefinition>;

    /// Fails with `NotFound` for an unknown ID.
    async fn get_by_id(&self, id: TaskId) -> Result<TaskDefinition>;

    /// Apply a partial update and return the stored result.
    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskDefinition>;

    async fn delete(&self, id: TaskId) -> Result<()>;

    async fn search_paginated(&self, filter: &TaskFilter) -> Result<Page<TaskDefinition>>;
}

/// Persistent storage of execution logs.
#[async_trait]
pub trait ExecutionLogRepository: Send + Sync {
    async fn create(&self, log: NewExecutionLog) -> Result<ExecutionLog>;

    /// Most recent first.
    async fn list_for_task(&self, task_id: TaskId, limit: usize) -> Result<Vec<ExecutionLog>>;

    /// Delete logs whose execute time is before `cutoff`. Returns how many went.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Push hook for live subscribers of a task's execution stream.
/// Fire-and-forget: implementations must not block.
pub trait LogNotifier: Send + Sync {
    fn notify_log(&self, task_id: TaskId, log: &ExecutionLog);
}
