//! agent-queue
//!
//! Local task queue that runs coding requests through code-generation CLIs
//! with per-repository locking, provider fallback and follow-up chaining.

use agent_queue::cli::add::AddArgs;
use agent_queue::cli::doctor::{self, DoctorArgs};
use agent_queue::cli::{CancelArgs, Cli, Command, InitArgs, ListArgs, RunArgs, ShowArgs};
use agent_queue::config::{Config, ConfigLoader};
use agent_queue::db::Database;
use agent_queue::error::TaskError;
use agent_queue::format::{
    OutputFormat, format_task_line, format_task_markdown, format_tasks_markdown,
};
use agent_queue::lock::LockManager;
use agent_queue::types::{Task, TaskFilter, TaskStatus, TaskSummary};
use agent_queue::worker::{WorkerContext, WorkerPool};
use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, cli.verbose)?;

    let mut loader = ConfigLoader::load(cli.config.as_ref().map(PathBuf::from))?;
    let config_file = loader.paths.config_file();
    let config_path_used = loader.config_path().map(Path::to_path_buf);

    // Override paths from CLI arguments
    if let Some(db_path) = &cli.database {
        loader.config_mut().database.path = db_path.into();
    }
    let config = loader.into_config();

    match cli.command {
        Command::Init(args) => run_init(&config, &config_file, args),
        Command::Add(args) => run_add(&config, args),
        Command::List(args) => run_list(&config, args),
        Command::Run(args) => run_workers(&config, args).await,
        Command::Show(args) => run_show(&config, args),
        Command::Cancel(args) => run_cancel(&config, args),
        Command::Doctor(args) => run_doctor(&config, config_path_used.as_deref(), args),
    }
}

/// Initialize logging based on --log option. `RUST_LOG` wins when set.
fn init_logging(log: &str, verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
        })
    };

    match log {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn open_database(config: &Config) -> Result<Database> {
    config.ensure_db_dir()?;
    Database::open(&config.database.path)
}

fn output_format(config: &Config, requested: Option<&str>) -> Result<OutputFormat> {
    match requested {
        None => Ok(config.default_format),
        Some(raw) => OutputFormat::from_str(raw).ok_or_else(|| {
            TaskError::invalid_value("format", format!("unknown format '{}'", raw)).into()
        }),
    }
}

/// Write a default config file and create the database.
fn run_init(config: &Config, config_file: &Path, args: InitArgs) -> Result<()> {
    if config_file.exists() && !args.force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            config_file.display()
        );
    } else {
        Config::default().save(config_file)?;
        println!("Wrote {}", config_file.display());
    }

    open_database(config)?;
    println!("Database ready at {}", config.database.path.display());
    Ok(())
}

fn run_add(config: &Config, args: AddArgs) -> Result<()> {
    let db = open_database(config)?;
    let task = db.create_task(args.into_new_task())?;
    info!(task_id = task.id, status = %task.status, "Task enqueued");

    match config.default_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&task)?),
        OutputFormat::Markdown => println!("{}", format_task_line(&task)),
    }
    Ok(())
}

fn run_list(config: &Config, args: ListArgs) -> Result<()> {
    let format = output_format(config, args.format.as_deref())?;
    let db = open_database(config)?;

    let mut filter = TaskFilter {
        repo_path: args.repo,
        parent_task_id: args.parent,
        chain_group_id: args.chain_group,
        limit: args.limit,
        ..Default::default()
    };
    for raw in &args.status {
        let status = TaskStatus::from_str(raw.trim()).ok_or_else(|| {
            TaskError::invalid_value("status", format!("unknown status '{}'", raw))
        })?;
        filter = filter.with_status(status);
    }

    let tasks = db.list_tasks(&filter)?;
    match format {
        OutputFormat::Json => {
            let summaries: Vec<TaskSummary> = tasks.iter().map(Task::summary).collect();
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        OutputFormat::Markdown => print!("{}", format_tasks_markdown(&tasks)),
    }
    Ok(())
}

async fn run_workers(config: &Config, args: RunArgs) -> Result<()> {
    let db = open_database(config)?;
    let ctx = WorkerContext::from_config(db, config)?;
    let count = args.workers.unwrap_or(config.workers.count);
    let pool = WorkerPool::new(ctx, count);

    if args.until_empty {
        pool.run_until_idle().await?;
        info!("Queue drained");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, waiting for in-flight tasks");
            let _ = shutdown_tx.send(true);
        }
    });

    pool.run(shutdown_rx).await
}

fn run_show(config: &Config, args: ShowArgs) -> Result<()> {
    let format = output_format(config, args.format.as_deref())?;
    let db = open_database(config)?;

    let task = db.require_task(args.id)?;
    let history = db.get_task_history(task.id)?;

    let blocked_by = match (task.status, task.depends_on_task_id) {
        (TaskStatus::WaitingDependency, Some(dep)) => db
            .get_task(dep)?
            .map(|d| d.status)
            .filter(|s| matches!(s, TaskStatus::Failed | TaskStatus::Cancelled)),
        _ => None,
    };

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "task": task,
                "history": history,
                "dependency_unsatisfiable": blocked_by,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Markdown => print!("{}", format_task_markdown(&task, &history, blocked_by)),
    }
    Ok(())
}

fn run_cancel(config: &Config, args: CancelArgs) -> Result<()> {
    let db = open_database(config)?;
    if db.cancel_task(args.id)? {
        println!("Cancelled task {}", args.id);
    } else {
        let task = db.require_task(args.id)?;
        warn!(task_id = task.id, status = %task.status, "Cancel refused");
        println!(
            "Task {} is {} and can no longer be cancelled",
            task.id, task.status
        );
    }
    Ok(())
}

fn run_doctor(config: &Config, config_path: Option<&Path>, args: DoctorArgs) -> Result<()> {
    let db = open_database(config)?;
    let locks = LockManager::new(
        db.clone(),
        Duration::from_secs(config.locks.ttl_seconds),
        Duration::from_millis(config.workers.heartbeat_interval_ms),
    );

    let report = doctor::run_doctor(config, config_path, &db, &locks, &args)?;
    print!("{}", doctor::format_report(&report, locks.ttl_ms()));

    if !report.all_ok() {
        std::process::exit(1);
    }
    Ok(())
}
