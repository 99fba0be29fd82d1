//! Execution log recorder: turns a raw outcome into a durable log record and
//! pushes it to live subscribers. Makes no business decisions.

use std::sync::Arc;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{ExecutionLogRepository, LogNotifier};
use cadence_core::types::{ExecutionLog, ExecutionOutcome, NewExecutionLog, TaskId};
use chrono::{DateTime, Utc};

pub struct ExecutionRecorder {
    logs: Arc<dyn ExecutionLogRepository>,
    notifier: Arc<dyn LogNotifier>,
}

impl ExecutionRecorder {
    pub fn new(logs: Arc<dyn ExecutionLogRepository>, notifier: Arc<dyn LogNotifier>) -> Self {
        Self { logs, notifier }
    }

    /// Persist one log record, then notify subscribers with the stored record.
    ///
    /// Nothing is pushed when persistence fails.
    pub async fn record(
        &self,
        task_id: TaskId,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        error: Option<&CadenceError>,
    ) -> Result<ExecutionLog> {
        let entry = NewExecutionLog {
            task_id,
            execute_time: started_at,
            outcome: if error.is_some() {
                ExecutionOutcome::Failure
            } else {
                ExecutionOutcome::Success
            },
            duration_ms,
            error_message: error.map(|e| e.to_string()).unwrap_or_default(),
        };

        let log = self.logs.create(entry).await?;
        self.notifier.notify_log(task_id, &log);
        Ok(log)
    }

    /// The underlying log repository.
    pub fn logs(&self) -> &Arc<dyn ExecutionLogRepository> {
        &self.logs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogBroadcaster;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_success_and_failure_records() {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(LogBroadcaster::default());
        let recorder = ExecutionRecorder::new(store.clone(), hub.clone());
        let mut rx = hub.subscribe(9);

        let started = Utc::now();
        let ok = recorder.record(9, started, 12, None).await.unwrap();
        assert!(ok.is_success());
        assert!(ok.error_message.is_empty());
        assert_eq!(ok.execute_time, started);

        let err = CadenceError::Execution("exit status 1".into());
        let failed = recorder.record(9, started, 40, Some(&err)).await.unwrap();
        assert_eq!(failed.outcome, ExecutionOutcome::Failure);
        assert!(failed.error_message.contains("exit status 1"));

        assert_eq!(rx.recv().await.unwrap().id, ok.id);
        assert_eq!(rx.recv().await.unwrap().id, failed.id);

        let stored = store.list_for_task(9, 10).await.unwrap();
        assert_eq!(stored.len(), 2);
    }
}
