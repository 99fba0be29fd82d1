//! # Cadence Executors
//!
//! Execution strategies selected by task type:
//! - `function`: dispatch to a named in-process callable
//! - `http`: outbound HTTP request with timeout, headers and body
//! - `shell`: external command with timeout, working dir and env overrides
//!
//! The [`ExecutorRegistry`] maps task-type keys to strategies and is the only
//! place the scheduler touches them.

pub mod function;
pub mod http;
pub mod registry;
pub mod shell;

pub use function::{FunctionExecutor, FunctionParams};
pub use http::{HttpExecutor, HttpParams};
pub use registry::ExecutorRegistry;
pub use shell::{ShellExecutor, ShellParams};

use cadence_core::error::{CadenceError, Result};
use serde::de::DeserializeOwned;

/// Parse a task's opaque params. An empty payload reads as `{}`.
pub(crate) fn parse_params<T: DeserializeOwned>(raw: &str, kind: &str) -> Result<T> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw)
        .map_err(|e| CadenceError::InvalidParams(format!("failed to parse {kind} params: {e}")))
}
