//! Executor registry: maps a task type to its execution strategy.

use std::collections::HashMap;
use std::sync::Arc;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::TaskExecutor;
use cadence_core::types::TaskDefinition;
use parking_lot::RwLock;

/// Registry of executors keyed by task type.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<String, Arc<dyn TaskExecutor>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a task type with an executor. Last write wins.
    pub fn register_executor(&self, task_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        let task_type = task_type.into();
        tracing::info!("🔌 Registered executor '{}' for task type '{}'", executor.name(), task_type);
        self.executors.write().insert(task_type, executor);
    }

    /// Whether some executor handles this task type.
    pub fn contains(&self, task_type: &str) -> bool {
        self.executors.read().contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Run a task with the executor registered for its type.
    ///
    /// The executor's own result is returned verbatim.
    pub async fn execute(&self, task: &TaskDefinition) -> Result<()> {
        let executor = self
            .executors
            .read()
            .get(&task.task_type)
            .cloned()
            .ok_or_else(|| CadenceError::ExecutorNotFound(task.task_type.clone()))?;

        tracing::info!(
            "▶️ Executing task #{} '{}' with {} executor",
            task.id,
            task.name,
            executor.name()
        );
        executor.execute(task).await
    }
}
