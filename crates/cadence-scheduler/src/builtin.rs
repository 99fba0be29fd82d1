//! Built-in functions for the `function` task type.

use std::sync::Arc;

use cadence_core::error::CadenceError;
use cadence_core::traits::ExecutionLogRepository;
use cadence_executor::FunctionExecutor;
use chrono::Utc;

pub const CLEAN_UP_OLD_LOGS: &str = "clean_up_old_logs";

/// Register every built-in function on `functions`.
///
/// `clean_up_old_logs` deletes execution logs older than `params.retain_days`,
/// falling back to `default_retain_days`.
pub fn register_builtin_functions(
    functions: &FunctionExecutor,
    logs: Arc<dyn ExecutionLogRepository>,
    default_retain_days: u32,
) {
    functions.register_function(CLEAN_UP_OLD_LOGS, move |task, params| {
        let logs = logs.clone();
        async move {
            let retain_days = match params.get("retain_days") {
                None => default_retain_days as i64,
                Some(v) => v.as_i64().filter(|d| *d >= 0).ok_or_else(|| {
                    CadenceError::InvalidParams(format!(
                        "retain_days must be a non-negative integer, got {v}"
                    ))
                })?,
            };
            let cutoff = Utc::now() - chrono::Duration::days(retain_days);
            let purged = logs.purge_before(cutoff).await?;
            tracing::info!(
                "🧹 Task #{} purged {} execution log(s) older than {} day(s)",
                task.id,
                purged,
                retain_days
            );
            Ok::<(), CadenceError>(())
        }
    });
}
