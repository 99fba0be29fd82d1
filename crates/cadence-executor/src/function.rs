//! Function executor: dispatch to a named, previously registered callable.
//!
//! Params: `{"function_name": "...", "params": {...}}`. The callable receives the
//! task definition and the inner `params` object. There is no intrinsic timeout:
//! the call runs as long as the callable takes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::TaskExecutor;
use cadence_core::types::TaskDefinition;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Payload of a `function` task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionParams {
    #[serde(default, alias = "functionName")]
    pub function_name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

type TaskFn = Arc<dyn Fn(TaskDefinition, serde_json::Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Executes tasks by calling registered in-process functions.
#[derive(Default)]
pub struct FunctionExecutor {
    functions: RwLock<HashMap<String, TaskFn>>,
}

impl FunctionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callable under `name`. Re-registering replaces it.
    pub fn register_function<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(TaskDefinition, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let f: TaskFn = Arc::new(move |task: TaskDefinition, params: serde_json::Value| {
            f(task, params).boxed()
        });
        tracing::debug!("Registered function '{}'", name);
        self.functions.write().insert(name, f);
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }
}

#[async_trait]
impl TaskExecutor for FunctionExecutor {
    fn name(&self) -> &str {
        "function"
    }

    async fn execute(&self, task: &TaskDefinition) -> Result<()> {
        let params: FunctionParams = crate::parse_params(&task.params, "function")?;

        let function = self
            .functions
            .read()
            .get(&params.function_name)
            .cloned()
            .ok_or_else(|| CadenceError::FunctionNotFound(params.function_name.clone()))?;

        tracing::info!(
            "🧩 Task #{} calling function '{}'",
            task.id,
            params.function_name
        );
        function(task.clone(), params.params).await
    }
}
