//! # Cadence: cron-driven task execution engine
//!
//! Usage:
//!   cadence run                                   # Run the scheduler until Ctrl-C
//!   cadence task add --name backup --cron "0 3 * * *" --type shell --params '{"command":"tar czf /tmp/b.tgz /data"}'
//!   cadence task list                             # List persisted tasks
//!   cadence task enable 3                         # Mark a task enabled
//!   cadence logs 3 --limit 10                     # Show recent execution logs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cadence_core::config::CadenceConfig;
use cadence_core::traits::{ExecutionLogRepository, TaskRepository};
use cadence_core::types::{
    ExecType, NewTask, TASK_TYPE_FUNCTION, TASK_TYPE_HTTP, TASK_TYPE_SHELL, TaskFilter,
    TaskPatch, TaskStatus,
};
use cadence_executor::{ExecutorRegistry, FunctionExecutor, HttpExecutor, ShellExecutor};
use cadence_scheduler::{
    ExecutionRecorder, LogBroadcaster, SchedulerDb, TaskScheduler, register_builtin_functions,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence", version, about = "⏰ Cadence: cron-driven task execution engine")]
struct Cli {
    /// Config file (default: ~/.cadence/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path, overrides the config file
    #[arg(long)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load enabled tasks and run the scheduler until Ctrl-C
    Run,
    /// Manage persisted tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Show recent execution logs of a task
    Logs {
        task_id: i64,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a task
    Add {
        #[arg(long)]
        name: String,
        /// 5-field or 6-field (with seconds) cron expression
        #[arg(long)]
        cron: String,
        /// function | http | shell
        #[arg(long = "type")]
        task_type: String,
        /// Executor params as JSON
        #[arg(long, default_value = "{}")]
        params: String,
        /// recurring | one-time
        #[arg(long, default_value = "recurring")]
        exec_type: ExecType,
        #[arg(long, default_value = "")]
        description: String,
        /// Create the task disabled
        #[arg(long)]
        disabled: bool,
    },
    /// List tasks
    List {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Mark a task enabled
    Enable { id: i64 },
    /// Mark a task disabled
    Disable { id: i64 },
}

fn load_config(cli: &Cli) -> Result<CadenceConfig> {
    let mut config = match &cli.config {
        Some(path) => CadenceConfig::load_from(path)?,
        None => CadenceConfig::load()?,
    };
    if let Some(db_path) = &cli.db_path {
        config.database.path = db_path.clone();
    }
    Ok(config)
}

fn open_db(config: &CadenceConfig) -> Result<Arc<SchedulerDb>> {
    let path = config.database.resolved_path();
    let db = SchedulerDb::open(&path)
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(Arc::new(db))
}

fn build_scheduler(config: &CadenceConfig, db: Arc<SchedulerDb>) -> Result<TaskScheduler> {
    let functions = FunctionExecutor::new();
    register_builtin_functions(&functions, db.clone(), config.logs.retain_days);

    let executors = Arc::new(ExecutorRegistry::new());
    executors.register_executor(TASK_TYPE_FUNCTION, Arc::new(functions));
    executors.register_executor(
        TASK_TYPE_HTTP,
        Arc::new(HttpExecutor::from_config(&config.executor)?),
    );
    executors.register_executor(
        TASK_TYPE_SHELL,
        Arc::new(ShellExecutor::from_config(&config.executor)),
    );

    let hub = Arc::new(LogBroadcaster::from_config(&config.notify));
    let recorder = ExecutionRecorder::new(db.clone(), hub);
    Ok(TaskScheduler::new(db, executors, recorder, &config.scheduler))
}

async fn run(config: &CadenceConfig) -> Result<()> {
    let db = open_db(config)?;
    let scheduler = build_scheduler(config, db)?;
    scheduler.start().await?;
    println!("⏰ Cadence running, {} trigger(s) live. Ctrl-C to stop.", scheduler.list_all_tasks().len());

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut hangup = signal(SignalKind::hangup())?;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = hangup.recv() => match scheduler.reload_tasks().await {
                    Ok(live) => tracing::info!("🔄 SIGHUP: {} trigger(s) live", live),
                    Err(e) => tracing::error!("Reload failed: {e}"),
                },
            }
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    scheduler.shutdown();
    let grace = Duration::from_secs(config.scheduler.shutdown_grace_secs);
    if !scheduler.wait_idle(grace).await {
        tracing::warn!("Exiting with executions still in flight");
    }
    println!("👋 Cadence stopped.");
    Ok(())
}

async fn task_command(config: &CadenceConfig, action: TaskAction) -> Result<()> {
    let db = open_db(config)?;
    match action {
        TaskAction::Add {
            name,
            cron,
            task_type,
            params,
            exec_type,
            description,
            disabled,
        } => {
            cadence_scheduler::cron::validate(&cron)?;
            serde_json::from_str::<serde_json::Value>(&params).context("--params must be JSON")?;
            let task = TaskRepository::create(
                db.as_ref(),
                NewTask {
                    name,
                    description,
                    cron_expression: cron,
                    task_type,
                    params,
                    exec_type,
                    status: if disabled {
                        TaskStatus::Disabled
                    } else {
                        TaskStatus::Enabled
                    },
                },
            )
            .await?;
            println!("✅ Task #{} '{}' created ({})", task.id, task.name, task.status);
        }
        TaskAction::List { status } => {
            let mut filter = TaskFilter {
                status,
                ..TaskFilter::default()
            };
            let mut shown = 0;
            loop {
                let page = db.search_paginated(&filter).await?;
                for t in &page.items {
                    let next = t
                        .next_execute_time
                        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".into());
                    println!(
                        "#{:<5} {:<24} {:<10} {:<9} {:<10} {:<20} next: {}",
                        t.id, t.name, t.status, t.task_type, t.exec_type, t.cron_expression, next
                    );
                }
                shown += page.items.len();
                if page.is_last() || page.items.is_empty() {
                    break;
                }
                filter.page += 1;
            }
            if shown == 0 {
                println!("No tasks.");
            }
        }
        TaskAction::Enable { id } => {
            db.update(id, TaskPatch::status(TaskStatus::Enabled)).await?;
            println!("✅ Task #{id} enabled (takes effect on next start or SIGHUP).");
        }
        TaskAction::Disable { id } => {
            db.update(id, TaskPatch::status(TaskStatus::Disabled)).await?;
            println!("⏹️ Task #{id} disabled (takes effect on next start or SIGHUP).");
        }
    }
    Ok(())
}

async fn logs_command(config: &CadenceConfig, task_id: i64, limit: usize) -> Result<()> {
    let db = open_db(config)?;
    let logs = db.list_for_task(task_id, limit).await?;
    if logs.is_empty() {
        println!("No execution logs for task #{task_id}.");
        return Ok(());
    }
    for log in logs {
        let icon = if log.is_success() { "✅" } else { "❌" };
        println!(
            "{} {} {:>7}ms {}",
            icon,
            log.execute_time.format("%Y-%m-%d %H:%M:%S"),
            log.duration_ms,
            log.error_message
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cadence=debug,cadence_core=debug,cadence_executor=debug,cadence_scheduler=debug"
    } else {
        "cadence=info,cadence_core=info,cadence_executor=info,cadence_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    match cli.command {
        Command::Run => run(&config).await,
        Command::Task { action } => task_command(&config, action).await,
        Command::Logs { task_id, limit } => logs_command(&config, task_id, limit).await,
    }
}
