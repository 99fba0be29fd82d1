//! Shell executor: run an external command bounded by a deadline.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::ExecutorConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::TaskExecutor;
use cadence_core::types::TaskDefinition;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Output embedded in error messages is cut to this many bytes.
const MAX_OUTPUT_BYTES: usize = 4000;

/// How long pipe readers may keep going once the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Payload of a `shell` task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellParams {
    /// Program to run. When empty the task description is used instead.
    #[serde(default)]
    pub command: String,
    /// When empty, `command` is split on whitespace.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, alias = "timeout_seconds", alias = "timeoutSeconds")]
    pub timeout: Option<u64>,
    #[serde(default, alias = "workDir")]
    pub work_dir: Option<String>,
    /// Merged on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ShellParams {
    /// Resolve program and argv, falling back to the task description.
    fn argv(&self, description: &str) -> Result<(String, Vec<String>)> {
        let command = if self.command.trim().is_empty() {
            description.trim()
        } else {
            self.command.trim()
        };
        if command.is_empty() {
            return Err(CadenceError::InvalidParams(
                "no command specified for shell execution".into(),
            ));
        }

        if !self.args.is_empty() {
            return Ok((command.to_string(), self.args.clone()));
        }
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Ok((program, parts.collect()))
    }
}

pub struct ShellExecutor {
    default_timeout_secs: u64,
}

impl ShellExecutor {
    pub fn new(default_timeout_secs: u64) -> Self {
        Self {
            default_timeout_secs,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.shell_timeout_secs)
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default().shell_timeout_secs)
    }
}

/// Copy everything a pipe yields into `sink` until EOF.
async fn drain<R: AsyncRead + Unpin>(mut pipe: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.lock().extend_from_slice(&buf[..n]),
        }
    }
}

async fn finish_readers(readers: Vec<JoinHandle<()>>, grace: Duration) {
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(grace, reader).await.is_err() {
            abort.abort();
        }
    }
}

fn truncate(output: &str) -> String {
    if output.len() <= MAX_OUTPUT_BYTES {
        return output.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n[truncated, {} bytes total]", &output[..end], output.len())
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, task: &TaskDefinition) -> Result<()> {
        let params: ShellParams = crate::parse_params(&task.params, "shell")?;
        let (program, args) = params.argv(&task.description)?;
        let secs = match params.timeout {
            Some(t) if t > 0 => t,
            _ => self.default_timeout_secs,
        };

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&args)
            .envs(&params.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = params.work_dir.as_deref().filter(|d| !d.is_empty()) {
            cmd.current_dir(dir);
        }

        tracing::debug!("🐚 Task #{} running: {} {:?}", task.id, program, args);

        let mut child = cmd
            .spawn()
            .map_err(|e| CadenceError::Execution(format!("failed to run '{program}': {e}")))?;

        // stdout and stderr share one buffer, interleaved as they arrive.
        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain(stdout, captured.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain(stderr, captured.clone())));
        }

        let status = match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                finish_readers(readers, Duration::ZERO).await;
                return Err(CadenceError::Execution(format!(
                    "failed to wait for '{program}': {e}"
                )));
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("⚠️ Failed to kill timed out '{}': {}", program, e);
                }
                None
            }
        };

        // Background grandchildren may keep a pipe open; do not wait on them forever.
        finish_readers(readers, READER_GRACE).await;
        let combined = String::from_utf8_lossy(&captured.lock()).into_owned();

        let Some(status) = status else {
            return Err(CadenceError::Timeout {
                what: format!("shell command '{program}'"),
                secs,
                output: Some(truncate(&combined)),
            });
        };

        if !status.success() {
            return Err(CadenceError::Execution(format!(
                "shell command failed: {}, output: {}",
                status,
                truncate(&combined)
            )));
        }

        tracing::info!(
            "🐚 Task #{} shell command succeeded ({} bytes output)",
            task.id,
            combined.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    #[tokio::test]
    async fn test_echo_succeeds() {
        let t = task("shell", serde_json::json!({"command": "echo ok"}));
        ShellExecutor::default().execute(&t).await.unwrap();
    }

    #[tokio::test]
    async fn test_description_fallback() {
        let mut t = task("shell", serde_json::json!({}));
        t.description = "true".into();
        ShellExecutor::default().execute(&t).await.unwrap();

        t.description = String::new();
        let err = ShellExecutor::default().execute(&t).await.unwrap_err();
        assert!(matches!(err, CadenceError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_embeds_output() {
        let t = task(
            "shell",
            serde_json::json!({"command": "sh", "args": ["-c", "echo from-stdout; echo from-stderr >&2; exit 3"]}),
        );
        let msg = ShellExecutor::default().execute(&t).await.unwrap_err().to_string();
        assert!(msg.contains("from-stdout"));
        assert!(msg.contains("from-stderr"));
    }

    #[tokio::test]
    async fn test_env_and_work_dir() {
        let dir = std::env::temp_dir();
        let t = task(
            "shell",
            serde_json::json!({
                "command": "sh",
                "args": ["-c", "test \"$CADENCE_FLAG\" = yes && test \"$(pwd -P)\" = \"$(cd \"$EXPECTED\" && pwd -P)\""],
                "work_dir": dir.to_string_lossy(),
                "env": {"CADENCE_FLAG": "yes", "EXPECTED": dir.to_string_lossy()}
            }),
        );
        ShellExecutor::default().execute(&t).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout() {
        let t = task("shell", serde_json::json!({"command": "sleep 5", "timeout": 1}));
        let err = ShellExecutor::default().execute(&t).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let t = task(
            "shell",
            serde_json::json!({
                "command": "sh",
                "args": ["-c", "echo partial-output; echo half-err >&2; sleep 5"],
                "timeout": 1
            }),
        );
        let started = std::time::Instant::now();
        let err = ShellExecutor::default().execute(&t).await.unwrap_err();
        assert!(err.is_timeout());
        let msg = err.to_string();
        assert!(msg.contains("timed out after 1s"), "{msg}");
        assert!(msg.contains("partial-output"), "{msg}");
        assert!(msg.contains("half-err"), "{msg}");
        // The orphaned `sleep` holds the pipes; the executor must not wait for it.
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let t = task("shell", serde_json::json!({"command": "definitely-not-a-real-binary-xyz"}));
        let err = ShellExecutor::default().execute(&t).await.unwrap_err();
        assert!(matches!(err, CadenceError::Execution(_)));
    }

    #[test]
    fn test_truncate_long_output() {
        let long = "x".repeat(MAX_OUTPUT_BYTES + 10);
        let cut = truncate(&long);
        assert!(cut.contains("[truncated"));
        assert_eq!(truncate("short"), "short");
    }
}
