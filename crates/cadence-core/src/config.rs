//! Cadence configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CadenceError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logs: LogRetentionConfig,
}

impl CadenceConfig {
    /// Load config from the default path (~/.cadence/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CadenceError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CadenceError::Config(format!("Failed to parse config: {e}")))?;
        if config.scheduler.max_concurrent == 0 {
            return Err(CadenceError::Config(
                "scheduler.max_concurrent must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CadenceError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Cadence home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cadence")
    }
}

/// Dispatch runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Global ceiling on simultaneously executing triggers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Page size used when loading enabled tasks at start/reload.
    #[serde(default = "default_load_page_size")]
    pub load_page_size: usize,
    /// How long shutdown waits for in-flight executions to record their logs.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_max_concurrent() -> usize { 10 }
fn default_load_page_size() -> usize { 100 }
fn default_shutdown_grace_secs() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            load_page_size: default_load_page_size(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// SQLite storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.cadence/cadence.db".into() }

impl DatabaseConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Executor defaults, used when a task's params carry no timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout() -> u64 { 30 }
fn default_shell_timeout() -> u64 { 300 }
fn default_user_agent() -> String { "Cadence/0.2".into() }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            shell_timeout_secs: default_shell_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Live log notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// How many recent logs the broadcaster keeps in memory.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Per-task broadcast channel capacity.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_history_size() -> usize { 100 }
fn default_channel_capacity() -> usize { 64 }

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Execution log retention, used by the built-in cleanup function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRetentionConfig {
    #[serde(default = "default_retain_days")]
    pub retain_days: u32,
}

fn default_retain_days() -> u32 { 30 }

impl Default for LogRetentionConfig {
    fn default() -> Self {
        Self {
            retain_days: default_retain_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CadenceConfig::default();
        assert_eq!(config.scheduler.max_concurrent, 10);
        assert_eq!(config.executor.http_timeout_secs, 30);
        assert_eq!(config.executor.shell_timeout_secs, 300);
        assert_eq!(config.notify.history_size, 100);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scheduler]\nmax_concurrent = 3\n").unwrap();

        let config = CadenceConfig::load_from(&path).unwrap();
        assert_eq!(config.scheduler.max_concurrent, 3);
        assert_eq!(config.scheduler.load_page_size, 100);
        assert_eq!(config.scheduler.shutdown_grace_secs, 30);
        assert_eq!(config.logs.retain_days, 30);
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scheduler]\nmax_concurrent = 0\n").unwrap();
        assert!(matches!(
            CadenceConfig::load_from(&path),
            Err(CadenceError::Config(_))
        ));
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = CadenceConfig::default();
        config.database.path = "/tmp/x.db".into();
        config.save_to(&path).unwrap();

        let loaded = CadenceConfig::load_from(&path).unwrap();
        assert_eq!(loaded.database.resolved_path(), PathBuf::from("/tmp/x.db"));
    }
}
