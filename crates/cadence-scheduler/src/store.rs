//! In-memory task and execution-log store.
//! Zero setup: used by tests and by callers embedding the scheduler without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{ExecutionLogRepository, TaskRepository};
use cadence_core::types::{
    ExecutionLog, NewExecutionLog, NewTask, Page, TaskDefinition, TaskFilter, TaskId, TaskPatch,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Default)]
struct State {
    tasks: BTreeMap<TaskId, TaskDefinition>,
    logs: Vec<ExecutionLog>,
    next_task_id: TaskId,
    next_log_id: i64,
}

/// Map-backed implementation of both repository traits.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task with a caller-chosen ID.
    pub fn put_task(&self, task: TaskDefinition) {
        let mut state = self.state.lock();
        state.next_task_id = state.next_task_id.max(task.id);
        state.tasks.insert(task.id, task);
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Every stored log, oldest first.
    pub fn all_logs(&self) -> Vec<ExecutionLog> {
        self.state.lock().logs.clone()
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn create(&self, task: NewTask) -> Result<TaskDefinition> {
        let mut state = self.state.lock();
        if state.tasks.values().any(|t| t.name == task.name) {
            return Err(CadenceError::Repository(format!(
                "task name already exists: {}",
                task.name
            )));
        }
        state.next_task_id += 1;
        let created = TaskDefinition::from_new(state.next_task_id, task);
        state.tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: TaskId) -> Result<TaskDefinition> {
        self.state
            .lock()
            .tasks
            .get(&id)
            .cloned()
            .ok_or(CadenceError::NotFound(id))
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskDefinition> {
        let mut state = self.state.lock();
        let task = state.tasks.get_mut(&id).ok_or(CadenceError::NotFound(id))?;
        task.apply(&patch);
        Ok(task.clone())
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        self.state
            .lock()
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(CadenceError::NotFound(id))
    }

    async fn search_paginated(&self, filter: &TaskFilter) -> Result<Page<TaskDefinition>> {
        let state = self.state.lock();
        let matching: Vec<&TaskDefinition> =
            state.tasks.values().filter(|t| filter.matches(t)).collect();
        let items = matching
            .iter()
            .skip(filter.offset())
            .take(filter.page_size)
            .map(|t| (*t).clone())
            .collect();
        Ok(Page {
            items,
            total: matching.len(),
            page: filter.page,
            page_size: filter.page_size,
        })
    }
}

#[async_trait]
impl ExecutionLogRepository for MemoryStore {
    async fn create(&self, log: NewExecutionLog) -> Result<ExecutionLog> {
        let mut state = self.state.lock();
        state.next_log_id += 1;
        let created = ExecutionLog::from_new(state.next_log_id, log);
        state.logs.push(created.clone());
        Ok(created)
    }

    async fn list_for_task(&self, task_id: TaskId, limit: usize) -> Result<Vec<ExecutionLog>> {
        Ok(self
            .state
            .lock()
            .logs
            .iter()
            .rev()
            .filter(|l| l.task_id == task_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock();
        let before = state.logs.len();
        state.logs.retain(|l| l.execute_time >= cutoff);
        Ok(before - state.logs.len())
    }
}
