//! Git workflow around task execution.
//!
//! Before the provider runs the task gets its own branch; afterwards any
//! changes are committed and optionally pushed. Git problems are recorded on
//! the task's `git_detail` and never change its status.

use crate::config::GitConfig;
use crate::types::{Task, TaskId};
use async_trait::async_trait;
use heck::ToKebabCase;
use std::path::Path;
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest title slug used in branch names.
pub const MAX_SLUG_LEN: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(String),
    /// Working tree was clean.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    Failed(String),
}

#[async_trait]
pub trait GitClient: Send + Sync {
    async fn is_repo(&self, repo: &Path) -> bool;

    /// Switch to `name`, creating it from HEAD if needed.
    async fn ensure_branch(&self, repo: &Path, name: &str) -> Result<(), GitError>;

    async fn current_branch(&self, repo: &Path) -> Result<String, GitError>;

    /// Stage everything and commit. Returns `Skipped` on a clean tree.
    async fn commit_all(&self, repo: &Path, message: &str) -> Result<CommitOutcome, GitError>;

    async fn push(&self, repo: &Path, remote: &str, branch: &str) -> PushOutcome;
}

/// `<prefix>task-<id>-<kebab-title>`, title slug capped at [`MAX_SLUG_LEN`].
pub fn branch_name_for(prefix: &str, task_id: TaskId, title: &str) -> String {
    let slug: String = title
        .to_kebab_case()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(MAX_SLUG_LEN)
        .collect();
    let slug = slug.trim_matches('-');

    if slug.is_empty() {
        format!("{}task-{}", prefix, task_id)
    } else {
        format!("{}task-{}-{}", prefix, task_id, slug)
    }
}

pub fn commit_message_for(task: &Task) -> String {
    format!("agent: task {} {}", task.id, task.title)
}

/// Git client that shells out to the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct CliGit;

impl CliGit {
    async fn run(&self, repo: &Path, args: &[&str]) -> Result<Output, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Run and require success; returns trimmed stdout.
    async fn check(&self, repo: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(repo, args).await?;
        if !output.status.success() {
            return Err(GitError::Command {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitClient for CliGit {
    async fn is_repo(&self, repo: &Path) -> bool {
        matches!(
            self.check(repo, &["rev-parse", "--is-inside-work-tree"]).await.as_deref(),
            Ok("true")
        )
    }

    async fn ensure_branch(&self, repo: &Path, name: &str) -> Result<(), GitError> {
        let reference = format!("refs/heads/{}", name);
        let exists = self
            .run(repo, &["rev-parse", "--verify", "--quiet", &reference])
            .await?
            .status
            .success();

        if exists {
            self.check(repo, &["checkout", name]).await?;
        } else {
            self.check(repo, &["checkout", "-b", name]).await?;
        }
        Ok(())
    }

    async fn current_branch(&self, repo: &Path) -> Result<String, GitError> {
        self.check(repo, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn commit_all(&self, repo: &Path, message: &str) -> Result<CommitOutcome, GitError> {
        let status = self.check(repo, &["status", "--porcelain"]).await?;
        if status.is_empty() {
            return Ok(CommitOutcome::Skipped);
        }

        self.check(repo, &["add", "-A"]).await?;
        self.check(repo, &["commit", "-m", message]).await?;
        let hash = self.check(repo, &["rev-parse", "HEAD"]).await?;
        Ok(CommitOutcome::Committed(hash))
    }

    async fn push(&self, repo: &Path, remote: &str, branch: &str) -> PushOutcome {
        match self.check(repo, &["push", "-u", remote, branch]).await {
            Ok(_) => PushOutcome::Pushed,
            Err(e) => PushOutcome::Failed(e.to_string()),
        }
    }
}

/// What the git steps did for one task.
#[derive(Debug, Clone, Default)]
pub struct GitReport {
    pub branch_name: Option<String>,
    pub commit_hash: Option<String>,
    pub notes: Vec<String>,
    skipped: bool,
}

impl GitReport {
    /// Notes joined for the task's `git_detail`.
    pub fn detail(&self) -> Option<String> {
        (!self.notes.is_empty()).then(|| self.notes.join("; "))
    }

    fn note(&mut self, task_id: TaskId, note: String) {
        debug!(task_id, "git: {}", note);
        self.notes.push(note);
    }
}

/// Applies the configured git steps through a [`GitClient`].
#[derive(Clone)]
pub struct GitWorkflow {
    client: Arc<dyn GitClient>,
    config: GitConfig,
}

impl GitWorkflow {
    pub fn new(client: Arc<dyn GitClient>, config: GitConfig) -> Self {
        Self { client, config }
    }

    /// Branch setup before the provider runs.
    pub async fn prepare(&self, task: &Task) -> GitReport {
        let mut report = GitReport::default();
        if !self.config.enabled {
            report.skipped = true;
            return report;
        }

        let repo = Path::new(&task.repo_path);
        if !self.client.is_repo(repo).await {
            report.skipped = true;
            report.note(task.id, "not a git repository, git steps skipped".to_string());
            return report;
        }

        if self.config.auto_branch {
            let name = branch_name_for(&self.config.branch_prefix, task.id, &task.title);
            match self.client.ensure_branch(repo, &name).await {
                Ok(()) => {
                    report.note(task.id, format!("checked out {}", name));
                    report.branch_name = Some(name);
                }
                Err(e) => {
                    warn!(task_id = task.id, "Branch setup failed: {}", e);
                    report.note(task.id, format!("branch {} failed: {}", name, e));
                }
            }
        } else {
            match self.client.current_branch(repo).await {
                Ok(branch) => report.branch_name = Some(branch),
                Err(e) => report.note(task.id, format!("could not read current branch: {}", e)),
            }
        }

        report
    }

    /// Commit and push after a successful run.
    pub async fn finish(&self, task: &Task, report: &mut GitReport) {
        if report.skipped || !self.config.auto_commit {
            return;
        }

        let repo = Path::new(&task.repo_path);
        match self.client.commit_all(repo, &commit_message_for(task)).await {
            Ok(CommitOutcome::Committed(hash)) => {
                report.note(task.id, format!("committed {}", hash));
                report.commit_hash = Some(hash);
            }
            Ok(CommitOutcome::Skipped) => {
                report.note(task.id, "no changes to commit".to_string());
                return;
            }
            Err(e) => {
                warn!(task_id = task.id, "Commit failed: {}", e);
                report.note(task.id, format!("commit failed: {}", e));
                return;
            }
        }

        if self.config.auto_push
            && let Some(branch) = report.branch_name.clone()
        {
            match self.client.push(repo, &self.config.remote, &branch).await {
                PushOutcome::Pushed => {
                    report.note(task.id, format!("pushed to {}/{}", self.config.remote, branch))
                }
                PushOutcome::Failed(detail) => {
                    warn!(task_id = task.id, "Push failed: {}", detail);
                    report.note(task.id, format!("push failed: {}", detail));
                }
            }
        }
    }
}
