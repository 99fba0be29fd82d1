//! # Cadence Core
//!
//! Shared vocabulary for the Cadence task engine: the task and execution-log
//! data model, the error taxonomy, the collaborator traits the scheduler
//! consumes (repositories, notification hook, executors) and configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use traits::{ExecutionLogRepository, LogNotifier, TaskExecutor, TaskRepository};
pub use types::{
    ExecType, ExecutionLog, ExecutionOutcome, NewExecutionLog, NewTask, Page, TaskDefinition,
    TaskFilter, TaskId, TaskPatch, TaskStatus,
};
