//! # Cadence Scheduler
//!
//! Turns persisted task definitions into running, cancellable, observable work.
//!
//! ## Architecture
//! ```text
//! TaskScheduler
//!   ├── trigger registry: task id → live cron trigger (one per id)
//!   ├── completion trackers: task id → in-flight execution signal
//!   ├── ConcurrencyLimiter: global ceiling, skip-to-next-tick when full
//!   └── on fire → ExecutorRegistry (function | http | shell)
//!                   └── ExecutionRecorder → log repository + LogNotifier
//! ```
//!
//! Storage is behind the `TaskRepository` / `ExecutionLogRepository` traits:
//! [`MemoryStore`] for tests and embedding, [`SchedulerDb`] for SQLite.

pub mod builtin;
pub mod cron;
pub mod limiter;
pub mod notify;
pub mod persistence;
pub mod recorder;
pub mod scheduler;
pub mod store;

pub use builtin::register_builtin_functions;
pub use cron::CronSchedule;
pub use limiter::{ConcurrencyLimiter, LimiterStats};
pub use notify::LogBroadcaster;
pub use persistence::SchedulerDb;
pub use recorder::ExecutionRecorder;
pub use scheduler::TaskScheduler;
pub use store::MemoryStore;
