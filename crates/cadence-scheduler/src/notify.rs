//! Live execution-log notification.
//! Lightweight: no external broker. One broadcast channel per watched task,
//! plus a small in-memory ring buffer of recent logs.

use std::collections::{HashMap, VecDeque};

use cadence_core::config::NotifyConfig;
use cadence_core::traits::LogNotifier;
use cadence_core::types::{ExecutionLog, TaskId};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Fans finished execution logs out to subscribers of each task.
pub struct LogBroadcaster {
    channels: Mutex<HashMap<TaskId, broadcast::Sender<ExecutionLog>>>,
    history: Mutex<VecDeque<ExecutionLog>>,
    history_size: usize,
    channel_capacity: usize,
}

impl LogBroadcaster {
    pub fn new(history_size: usize, channel_capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(history_size)),
            history_size,
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Self {
        Self::new(config.history_size, config.channel_capacity)
    }

    /// Receive every log recorded for `task_id` from now on.
    pub fn subscribe(&self, task_id: TaskId) -> broadcast::Receiver<ExecutionLog> {
        let mut channels = self.channels.lock();
        channels
            .entry(task_id)
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, task_id: TaskId) -> usize {
        self.channels
            .lock()
            .get(&task_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Recent logs, oldest first.
    pub fn history(&self) -> Vec<ExecutionLog> {
        self.history.lock().iter().cloned().collect()
    }

    /// Up to `limit` recent logs for one task, newest first.
    pub fn recent_for(&self, task_id: TaskId, limit: usize) -> Vec<ExecutionLog> {
        self.history
            .lock()
            .iter()
            .rev()
            .filter(|log| log.task_id == task_id)
            .take(limit)
            .cloned()
            .collect()
    }

    fn record(&self, log: &ExecutionLog) {
        if self.history_size == 0 {
            return;
        }
        let mut history = self.history.lock();
        if history.len() == self.history_size {
            history.pop_front();
        }
        history.push_back(log.clone());
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::from_config(&NotifyConfig::default())
    }
}

impl LogNotifier for LogBroadcaster {
    fn notify_log(&self, task_id: TaskId, log: &ExecutionLog) {
        self.record(log);

        let mut channels = self.channels.lock();
        let Some(tx) = channels.get(&task_id) else {
            return;
        };
        match tx.send(log.clone()) {
            Ok(n) => tracing::debug!("📣 Log for task #{} pushed to {} subscriber(s)", task_id, n),
            Err(_) => {
                // Every receiver is gone.
                channels.remove(&task_id);
            }
        }
    }
}
