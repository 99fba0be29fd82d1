//! Global concurrency ceiling for trigger executions.
//!
//! When every slot is taken, a due trigger is not queued: the caller skips
//! this occurrence and tries again at its next natural one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct ConcurrencyLimiter {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
    total_dispatched: AtomicU64,
    total_deferred: AtomicU64,
}

impl ConcurrencyLimiter {
    /// A ceiling of zero is raised to one.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            total_dispatched: AtomicU64::new(0),
            total_deferred: AtomicU64::new(0),
        }
    }

    /// Claim a slot without waiting. The slot frees when the permit drops.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => {
                self.total_dispatched.fetch_add(1, Ordering::Relaxed);
                Some(permit)
            }
            Err(_) => {
                self.total_deferred.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            active: self.max_concurrent - self.slots.available_permits(),
            max_concurrent: self.max_concurrent,
            total_dispatched: self.total_dispatched.load(Ordering::Relaxed),
            total_deferred: self.total_deferred.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the limiter's counters.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LimiterStats {
    pub active: usize,
    pub max_concurrent: usize,
    pub total_dispatched: u64,
    pub total_deferred: u64,
}
