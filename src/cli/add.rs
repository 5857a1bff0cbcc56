//! Add subcommand: enqueue a task.

use crate::types::{NewTask, Priority, TaskId};
use clap::Args;

/// Arguments for the add subcommand
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Short task title
    #[arg(short, long)]
    pub title: String,

    /// Repository the task runs in
    #[arg(short, long, value_name = "PATH")]
    pub repo_path: String,

    /// What the provider should do
    #[arg(long)]
    pub request: String,

    /// Constraint lines (repeatable)
    #[arg(long, value_name = "TEXT")]
    pub constraints: Vec<String>,

    /// Acceptance criteria (repeatable)
    #[arg(long, value_name = "TEXT")]
    pub acceptance: Vec<String>,

    /// Higher runs first
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: Priority,

    /// Task that must succeed before this one runs
    #[arg(long, value_name = "ID")]
    pub depends_on: Option<TaskId>,

    /// Task that spawned this one
    #[arg(long, value_name = "ID")]
    pub parent_task_id: Option<TaskId>,

    /// Allow denylisted commands in the request
    #[arg(long)]
    pub dangerous_ok: bool,

    /// Provider name recorded on the task
    #[arg(long, value_name = "NAME")]
    pub preferred_provider: Option<String>,
}

impl AddArgs {
    /// Build the insert payload. Repeated constraint flags become lines.
    pub fn into_new_task(self) -> NewTask {
        let mut task = NewTask::new(self.title, self.repo_path, self.request)
            .with_priority(self.priority)
            .with_acceptance(self.acceptance)
            .dangerous_ok(self.dangerous_ok);

        if !self.constraints.is_empty() {
            task = task.with_constraints(self.constraints.join("\n"));
        }
        if let Some(dep) = self.depends_on {
            task = task.depends_on(dep);
        }
        if let Some(parent) = self.parent_task_id {
            task = task.with_parent(parent);
        }
        task.preferred_provider = self.preferred_provider;
        task
    }
}

#[cfg(test)]
mod tests {
    use crate::cli::{Cli, Command};
    use clap::Parser;

    #[test]
    fn repeated_flags_collect() {
        let cli = Cli::parse_from([
            "agent-queue",
            "add",
            "--title",
            "Fix",
            "--repo-path",
            "/srv/app",
            "--request",
            "Fix the login bug",
            "--constraints",
            "no new deps",
            "--constraints",
            "keep API stable",
            "--acceptance",
            "tests pass",
            "--priority",
            "-3",
            "--depends-on",
            "4",
        ]);
        let Command::Add(args) = cli.command else {
            panic!("expected add");
        };

        let task = args.into_new_task();
        assert_eq!(task.constraints.as_deref(), Some("no new deps\nkeep API stable"));
        assert_eq!(task.acceptance, vec!["tests pass".to_string()]);
        assert_eq!(task.priority, -3);
        assert_eq!(task.depends_on_task_id, Some(4));
        assert!(!task.dangerous_ok);
        assert!(task.preferred_provider.is_none());
    }
}
