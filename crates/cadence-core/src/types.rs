//! Task definitions and execution logs: the data model shared by every crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task identity as assigned by the task repository.
pub type TaskId = i64;

/// Well-known task type keys.
pub const TASK_TYPE_FUNCTION: &str = "function";
pub const TASK_TYPE_HTTP: &str = "http";
pub const TASK_TYPE_SHELL: &str = "shell";

/// A schedulable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    pub id: TaskId,
    /// Unique, human-readable name.
    pub name: String,
    /// Free text. The shell executor falls back to it when no command is given.
    #[serde(default)]
    pub description: String,
    /// 5-field (minute resolution) or 6-field (second resolution) cron expression.
    pub cron_expression: String,
    /// Selects the executor strategy.
    pub task_type: String,
    /// Opaque JSON payload, parsed only by the executor.
    #[serde(default)]
    pub params: String,
    pub exec_type: ExecType,
    pub status: TaskStatus,
    pub last_execute_time: Option<DateTime<Utc>>,
    /// Informational only; dispatch is driven by the cron schedule.
    pub next_execute_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskDefinition {
    pub fn is_enabled(&self) -> bool {
        self.status == TaskStatus::Enabled
    }

    pub fn is_one_time(&self) -> bool {
        self.exec_type == ExecType::OneTime
    }

    /// Build a definition from a creation payload once the repository has
    /// assigned an ID.
    pub fn from_new(id: TaskId, new: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: new.name,
            description: new.description,
            cron_expression: new.cron_expression,
            task_type: new.task_type,
            params: new.params,
            exec_type: new.exec_type,
            status: new.status,
            last_execute_time: None,
            next_execute_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(at) = patch.last_execute_time {
            self.last_execute_time = Some(at);
        }
        if let Some(at) = patch.next_execute_time {
            self.next_execute_time = Some(at);
        }
        self.updated_at = Utc::now();
    }
}

/// Payload for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cron_expression: String,
    pub task_type: String,
    #[serde(default)]
    pub params: String,
    #[serde(default)]
    pub exec_type: ExecType,
    #[serde(default)]
    pub status: TaskStatus,
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Enabled,
    Running,
    Disabled,
    Error,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Enabled => "enabled",
            TaskStatus::Running => "running",
            TaskStatus::Disabled => "disabled",
            TaskStatus::Error => "error",
            TaskStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enabled" => Ok(TaskStatus::Enabled),
            "running" => Ok(TaskStatus::Running),
            "disabled" => Ok(TaskStatus::Disabled),
            "error" => Ok(TaskStatus::Error),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Whether a task keeps its trigger after a successful run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecType {
    #[default]
    Recurring,
    OneTime,
}

impl ExecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecType::Recurring => "recurring",
            ExecType::OneTime => "one_time",
        }
    }
}

impl std::fmt::Display for ExecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for ExecType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "recurring" => Ok(ExecType::Recurring),
            "one_time" | "onetime" | "once" => Ok(ExecType::OneTime),
            other => Err(format!("unknown exec type: {other}")),
        }
    }
}

/// Partial update of a persisted task. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub last_execute_time: Option<DateTime<Utc>>,
    pub next_execute_time: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_last_execute_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_execute_time = Some(at);
        self
    }

    pub fn with_next_execute_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_execute_time = at;
        self
    }
}

/// Filter for paginated task searches. Pages are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub page: usize,
    pub page_size: usize,
}

impl TaskFilter {
    pub fn with_status(status: TaskStatus, page_size: usize) -> Self {
        Self {
            status: Some(status),
            page: 1,
            page_size,
        }
    }

    pub fn matches(&self, task: &TaskDefinition) -> bool {
        self.status.is_none_or(|s| s == task.status)
    }

    /// Zero-based offset of the first item on this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) * self.page_size
    }
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            page_size: 100,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    /// True when no page follows this one.
    pub fn is_last(&self) -> bool {
        self.page_size == 0 || self.page * self.page_size >= self.total
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Failure,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failure => "failure",
        }
    }
}

impl std::str::FromStr for ExecutionOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionOutcome::Success),
            "failure" => Ok(ExecutionOutcome::Failure),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

/// Durable record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionLog {
    pub id: i64,
    pub task_id: TaskId,
    pub execute_time: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub duration_ms: u64,
    /// Empty on success.
    pub error_message: String,
}

impl ExecutionLog {
    pub fn from_new(id: i64, new: NewExecutionLog) -> Self {
        Self {
            id,
            task_id: new.task_id,
            execute_time: new.execute_time,
            outcome: new.outcome,
            duration_ms: new.duration_ms,
            error_message: new.error_message,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Success
    }
}

/// An execution log before the repository assigns its ID.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecutionLog {
    pub task_id: TaskId,
    pub execute_time: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub duration_ms: u64,
    pub error_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TaskDefinition {
        TaskDefinition::from_new(
            1,
            NewTask {
                name: "cleanup".into(),
                description: String::new(),
                cron_expression: "0 * * * *".into(),
                task_type: TASK_TYPE_FUNCTION.into(),
                params: "{}".into(),
                exec_type: ExecType::Recurring,
                status: TaskStatus::Enabled,
            },
        )
    }

    #[test]
    fn test_patch_leaves_unset_fields() {
        let mut task = sample();
        let at = Utc::now();
        task.apply(&TaskPatch::status(TaskStatus::Running).with_last_execute_time(at));
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.last_execute_time, Some(at));
        assert!(task.next_execute_time.is_none());

        task.apply(&TaskPatch::default());
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn test_status_serde_is_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        let exec: ExecType = serde_json::from_str("\"one_time\"").unwrap();
        assert_eq!(exec, ExecType::OneTime);
        assert_eq!("one-time".parse::<ExecType>().unwrap(), ExecType::OneTime);
        assert!("paused".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_filter_and_page() {
        let task = sample();
        assert!(TaskFilter::default().matches(&task));
        assert!(TaskFilter::with_status(TaskStatus::Enabled, 10).matches(&task));
        assert!(!TaskFilter::with_status(TaskStatus::Disabled, 10).matches(&task));

        let filter = TaskFilter {
            page: 3,
            ..TaskFilter::with_status(TaskStatus::Enabled, 10)
        };
        assert_eq!(filter.offset(), 20);

        let page: Page<i64> = Page {
            items: vec![],
            total: 25,
            page: 2,
            page_size: 10,
        };
        assert!(!page.is_last());
        let page = Page { page: 3, ..page };
        assert!(page.is_last());
    }
}
