//! Doctor subcommand: environment checks and crash recovery.
//!
//! Without `--reconcile` nothing is changed. With it, stale locks are
//! reclaimed, `running` tasks that no live lock guards are failed with
//! `CRASH_DETECTED` and stranded `selected` tasks go back to the queue.

use crate::config::Config;
use crate::db::{Database, now_ms};
use crate::error::ErrorCode;
use crate::format::format_locks_markdown;
use crate::lock::LockManager;
use crate::types::{RepoLock, Task, TaskId, TaskStatus};
use anyhow::Result;
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Arguments for the doctor subcommand
#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Reclaim stale locks, fail orphaned running tasks and requeue stranded selections
    #[arg(long)]
    pub reconcile: bool,
}

/// One environment check.
#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl Check {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// What `--reconcile` changed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub reclaimed: Vec<RepoLock>,
    pub failed: Vec<TaskId>,
    pub requeued: Vec<TaskId>,
}

/// Full doctor output.
#[derive(Debug, Default)]
pub struct DoctorReport {
    pub checks: Vec<Check>,
    pub locks: Vec<RepoLock>,
    pub orphaned: Vec<Task>,
    pub stranded: Vec<Task>,
    pub unsatisfiable: Vec<(Task, TaskStatus)>,
    pub reconciled: Option<ReconcileReport>,
}

impl DoctorReport {
    pub fn all_ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

/// Search `PATH` for an executable named `program`.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

/// Static checks: config file, provider commands, git, notifier.
pub fn environment_checks(config: &Config, config_path: Option<&Path>) -> Vec<Check> {
    let mut checks = Vec::new();

    checks.push(match config_path {
        Some(path) => Check::pass("config", format!("loaded {}", path.display())),
        None => Check::pass("config", "no config file, using defaults"),
    });

    checks.push(Check::pass(
        "database",
        format!("{}", config.database.path.display()),
    ));

    let mut providers = vec![("primary", &config.providers.primary)];
    if let Some(ref fallback) = config.providers.fallback {
        providers.push(("fallback", fallback));
    }
    for (role, provider) in providers {
        let name = format!("provider:{}", role);
        checks.push(match provider.program() {
            Some(program) => match find_on_path(program) {
                Some(path) => Check::pass(&name, format!("{} at {}", provider.name, path.display())),
                None => Check::fail(&name, format!("{}: `{}` not found on PATH", provider.name, program)),
            },
            None => Check::fail(&name, format!("{}: empty command", provider.name)),
        });
    }

    if config.git.enabled {
        checks.push(match find_on_path("git") {
            Some(path) => Check::pass("git", format!("{}", path.display())),
            None => Check::fail("git", "git not found on PATH"),
        });
    } else {
        checks.push(Check::pass("git", "disabled"));
    }

    checks.push(if config.telegram.is_configured() {
        Check::pass("notifier", "telegram")
    } else {
        Check::pass("notifier", "log only (telegram not configured)")
    });

    checks
}

/// Free stale locks and settle tasks whose worker is gone.
pub fn reconcile(db: &Database, locks: &LockManager) -> Result<ReconcileReport> {
    let mut report = ReconcileReport {
        reclaimed: locks.reclaim_stale()?,
        ..Default::default()
    };

    let cutoff = now_ms() - locks.ttl_ms();
    for task in db.orphaned_running_tasks(cutoff)? {
        let detail = match task.worker_id {
            Some(ref worker) => format!("worker {} stopped without finishing", worker),
            None => "worker stopped without finishing".to_string(),
        };
        if db.fail_running_task(
            task.id,
            None,
            ErrorCode::CrashDetected,
            &detail,
            "crash detected",
        )? {
            warn!(task_id = task.id, repo = %task.repo_path, "Orphaned task marked failed");
            report.failed.push(task.id);
        }
    }

    for task in db.stranded_selected_tasks(cutoff)? {
        if db.compare_and_set_status(
            task.id,
            TaskStatus::Selected,
            TaskStatus::Queued,
            None,
            Some("selection abandoned"),
        )? {
            warn!(task_id = task.id, repo = %task.repo_path, "Stranded selection returned to queue");
            report.requeued.push(task.id);
        }
    }

    info!(
        reclaimed = report.reclaimed.len(),
        failed = report.failed.len(),
        requeued = report.requeued.len(),
        "Reconcile finished"
    );
    Ok(report)
}

/// Gather the report, reconciling first when asked.
pub fn run_doctor(
    config: &Config,
    config_path: Option<&Path>,
    db: &Database,
    locks: &LockManager,
    args: &DoctorArgs,
) -> Result<DoctorReport> {
    let reconciled = if args.reconcile {
        Some(reconcile(db, locks)?)
    } else {
        None
    };

    let cutoff = now_ms() - locks.ttl_ms();
    Ok(DoctorReport {
        checks: environment_checks(config, config_path),
        locks: db.get_all_locks()?,
        orphaned: db.orphaned_running_tasks(cutoff)?,
        stranded: db.stranded_selected_tasks(cutoff)?,
        unsatisfiable: db.unsatisfiable_dependents()?,
        reconciled,
    })
}

/// Markdown rendering of a [`DoctorReport`].
pub fn format_report(report: &DoctorReport, ttl_ms: i64) -> String {
    let mut md = String::from("# Doctor\n\n## Checks\n");
    for check in &report.checks {
        let mark = if check.ok { "ok" } else { "FAIL" };
        md.push_str(&format!("- [{}] {}: {}\n", mark, check.name, check.detail));
    }

    md.push('\n');
    md.push_str(&format_locks_markdown(&report.locks, now_ms(), ttl_ms));

    if !report.orphaned.is_empty() {
        md.push_str("\n## Orphaned running tasks\n");
        for task in &report.orphaned {
            md.push_str(&format!(
                "- {} `{}` worker {}\n",
                task.id,
                task.repo_path,
                task.worker_id.as_deref().unwrap_or("-")
            ));
        }
        md.push_str("Run `doctor --reconcile` to mark them failed.\n");
    }

    if !report.stranded.is_empty() {
        md.push_str("\n## Stranded selections\n");
        for task in &report.stranded {
            md.push_str(&format!(
                "- {} `{}` selected by {}\n",
                task.id,
                task.repo_path,
                task.worker_id.as_deref().unwrap_or("-")
            ));
        }
        md.push_str("Run `doctor --reconcile` to return them to the queue.\n");
    }

    if !report.unsatisfiable.is_empty() {
        md.push_str("\n## Unsatisfiable dependencies\n");
        for (task, dep_status) in &report.unsatisfiable {
            md.push_str(&format!(
                "- {} waits on {} which is {}\n",
                task.id,
                task.depends_on_task_id.unwrap_or_default(),
                dep_status
            ));
        }
    }

    if let Some(ref reconciled) = report.reconciled {
        md.push_str(&format!(
            "\n## Reconciled\n- locks reclaimed: {}\n- tasks failed: {}\n- tasks requeued: {}\n",
            reconciled.reclaimed.len(),
            reconciled.failed.len(),
            reconciled.requeued.len()
        ));
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_programs_on_path() {
        assert!(find_on_path("definitely-not-a-real-binary-4821").is_none());
        #[cfg(unix)]
        assert!(find_on_path("sh").is_some());
    }

    #[test]
    fn missing_provider_fails_check() {
        let mut config = Config::default();
        config.providers.primary.command = vec!["definitely-not-a-real-binary-4821".into()];
        config.providers.fallback = None;
        config.git.enabled = false;

        let checks = environment_checks(&config, None);
        let primary = checks.iter().find(|c| c.name == "provider:primary").unwrap();
        assert!(!primary.ok);
        assert!(checks.iter().all(|c| c.name != "provider:fallback"));
    }
}
