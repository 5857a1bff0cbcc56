//! Worker execution loop.
//!
//! Each cycle: select a task, take its repository lock, run the safety gate,
//! route the prompt to a provider, apply the git workflow, expand follow-ups,
//! record the result, release the lock and notify. One task failing never
//! stops the loop.

use crate::chain::ChainExpander;
use crate::config::Config;
use crate::db::{Database, now_ms};
use crate::error::{ErrorCode, TaskError};
use crate::git::{CliGit, GitClient, GitWorkflow};
use crate::lock::LockManager;
use crate::notify::{CompletionNotice, Notifier, notifier_from_config, notify_best_effort};
use crate::prompt::PromptCompiler;
use crate::provider::{ProviderRequest, ProviderRouter};
use crate::safety::{SafetyGate, SafetyVerdict};
use crate::scheduler::{Scheduler, Selection};
use crate::types::{LockGrant, Task, TaskId, TaskStatus, TaskUpdate};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Timing knobs for the loop.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub idle_backoff: Duration,
    pub blocked_backoff: Duration,
    pub provider_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_backoff: Duration::from_millis(config.workers.idle_backoff_ms),
            blocked_backoff: Duration::from_millis(config.workers.blocked_backoff_ms),
            provider_timeout: config.providers.timeout(),
        }
    }
}

/// Everything a worker needs. Cheap to clone; shared by the pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub db: Database,
    pub scheduler: Scheduler,
    pub locks: LockManager,
    pub safety: Arc<SafetyGate>,
    pub router: Arc<ProviderRouter>,
    pub git: GitWorkflow,
    pub chain: ChainExpander,
    pub notifier: Arc<dyn Notifier>,
    pub prompts: Arc<PromptCompiler>,
    pub settings: WorkerSettings,
}

impl WorkerContext {
    /// Assemble a context around the given collaborators.
    pub fn new(
        db: Database,
        config: &Config,
        router: ProviderRouter,
        git: Arc<dyn GitClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ttl = Duration::from_secs(config.locks.ttl_seconds);
        let heartbeat = Duration::from_millis(config.workers.heartbeat_interval_ms);

        Self {
            scheduler: Scheduler::new(
                db.clone(),
                config.lock_ttl_ms(),
                config.scheduler.max_cas_retries,
            ),
            locks: LockManager::new(db.clone(), ttl, heartbeat),
            safety: Arc::new(SafetyGate::new(&config.safety.denylist)),
            router: Arc::new(router),
            git: GitWorkflow::new(git, config.git.clone()),
            chain: ChainExpander::new(db.clone()),
            notifier,
            prompts: Arc::new(PromptCompiler::default()),
            settings: WorkerSettings::from_config(config),
            db,
        }
    }

    /// Context with subprocess providers, the `git` CLI and the configured notifier.
    pub fn from_config(db: Database, config: &Config) -> Result<Self> {
        let router = ProviderRouter::from_config(&config.providers)?;
        Ok(Self::new(
            db,
            config,
            router,
            Arc::new(CliGit),
            notifier_from_config(&config.telegram),
        ))
    }
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The task ran (or was rejected by the safety gate) and reached a terminal status.
    Processed { task_id: TaskId, status: TaskStatus },
    /// The repository was locked; the task went back to the queue.
    Requeued { task_id: TaskId },
    Empty,
    Blocked,
}

/// Random human-readable worker name.
pub fn generate_worker_id() -> String {
    use petname::{Generator, Petnames};

    Petnames::medium()
        .generate_one(2, "-")
        .unwrap_or_else(|| format!("worker-{}", chrono::Utc::now().timestamp_millis()))
}

pub struct Worker {
    id: String,
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self::with_id(generate_worker_id(), ctx)
    }

    pub fn with_id(id: impl Into<String>, ctx: WorkerContext) -> Self {
        Self { id: id.into(), ctx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run cycles until `shutdown` turns true. An in-flight task finishes first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.id, "Worker started");

        while !*shutdown.borrow() {
            let backoff = match self.run_once().await {
                Ok(CycleOutcome::Processed { .. }) | Ok(CycleOutcome::Requeued { .. }) => None,
                Ok(CycleOutcome::Empty) => Some(self.ctx.settings.idle_backoff),
                Ok(CycleOutcome::Blocked) => Some(self.ctx.settings.blocked_backoff),
                Err(e) => {
                    error!(worker = %self.id, "Worker cycle failed: {:#}", e);
                    Some(self.ctx.settings.idle_backoff)
                }
            };

            if let Some(delay) = backoff {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(worker = %self.id, "Worker stopped");
    }

    /// Run cycles until nothing can make progress.
    ///
    /// Stops on an empty queue, or when the queue is blocked with nothing in
    /// flight (only unsatisfiable dependents or stuck tasks remain). Failed
    /// cycles are logged and retried after a backoff.
    pub async fn run_until_idle(&self) -> Result<()> {
        loop {
            match self.run_once().await {
                Ok(CycleOutcome::Processed { .. }) | Ok(CycleOutcome::Requeued { .. }) => {}
                Ok(CycleOutcome::Empty) => return Ok(()),
                Ok(CycleOutcome::Blocked) => {
                    let cutoff = now_ms() - self.ctx.locks.ttl_ms();
                    match self.ctx.db.in_flight_count(cutoff) {
                        Ok(0) => {
                            debug!(worker = %self.id, "Queue blocked with nothing in flight, stopping");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => warn!(worker = %self.id, "Could not count in-flight tasks: {:#}", e),
                    }
                    tokio::time::sleep(self.ctx.settings.blocked_backoff).await;
                }
                Err(e) => {
                    error!(worker = %self.id, "Worker cycle failed: {:#}", e);
                    tokio::time::sleep(self.ctx.settings.idle_backoff).await;
                }
            }
        }
    }

    /// One select/execute cycle.
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        let task = match self.ctx.scheduler.select_next(&self.id)? {
            Selection::Task(task) => *task,
            Selection::Empty => {
                self.reclaim_stale_locks();
                return Ok(CycleOutcome::Empty);
            }
            Selection::Blocked => {
                self.reclaim_stale_locks();
                return Ok(CycleOutcome::Blocked);
            }
        };

        info!(worker = %self.id, task_id = task.id, repo = %task.repo_path, "Selected task: {}", task.title);

        let grant = match self.ctx.locks.acquire(&task.repo_path, &self.id, Some(task.id)) {
            Ok(grant) => grant,
            Err(e) => {
                self.requeue_after_error(&task);
                return Err(e);
            }
        };
        match grant {
            LockGrant::Granted => {}
            LockGrant::Denied { holder } => {
                let reason = format!("repository locked by {}", holder);
                self.ctx.scheduler.release_to_queue(&task, &self.id, &reason)?;
                debug!(worker = %self.id, task_id = task.id, %holder, "Lock denied, task requeued");
                return Ok(CycleOutcome::Requeued { task_id: task.id });
            }
        }

        let result = self.process_locked(&task).await;

        // The task must leave `running` before its repository is unlocked.
        let settled = match &result {
            Ok(_) => true,
            Err(e) => self.fail_after_error(&task, e),
        };
        if settled {
            if let Err(e) = self.ctx.locks.release(&task.repo_path, &self.id) {
                warn!(worker = %self.id, task_id = task.id, "Failed to release lock: {}", e);
            }
        } else {
            warn!(
                worker = %self.id,
                task_id = task.id,
                repo = %task.repo_path,
                "Task stuck in running, keeping lock until it goes stale"
            );
        }

        let finished = result?;

        info!(
            worker = %self.id,
            task_id = finished.id,
            status = %finished.status,
            provider = finished.assigned_provider.as_deref().unwrap_or("-"),
            "Task finished"
        );

        notify_best_effort(
            self.ctx.notifier.as_ref(),
            &CompletionNotice::from_task(&finished),
        )
        .await;

        Ok(CycleOutcome::Processed {
            task_id: finished.id,
            status: finished.status,
        })
    }

    /// Execute a selected task whose repository lock is held.
    async fn process_locked(&self, task: &Task) -> Result<Task> {
        let db = &self.ctx.db;

        if !db.compare_and_set_status(
            task.id,
            TaskStatus::Selected,
            TaskStatus::Running,
            Some(&self.id),
            Some("lock acquired"),
        )? {
            return Err(TaskError::new(
                ErrorCode::InvalidTransition,
                format!("Task {} is no longer selected by {}", task.id, self.id),
            )
            .into());
        }

        match self.ctx.safety.check(task) {
            SafetyVerdict::Allowed => {}
            SafetyVerdict::Overridden { pattern } => {
                warn!(task_id = task.id, %pattern, "Denylisted pattern allowed by dangerous_ok");
            }
            verdict @ SafetyVerdict::Blocked { .. } => {
                let message = verdict
                    .violation()
                    .map(|e| e.message)
                    .unwrap_or_else(|| "safety violation".to_string());
                warn!(task_id = task.id, "Blocked by safety gate: {}", message);
                db.update_fields(task.id, &TaskUpdate::failure(ErrorCode::SafetyViolation, message))?;
                self.finish(task.id, TaskStatus::Failed, "safety violation")?;
                return db.require_task(task.id);
            }
        }

        let _heartbeat = self.ctx.locks.start_heartbeat(&task.repo_path, &self.id);

        let mut git_report = self.ctx.git.prepare(task).await;

        let request = ProviderRequest {
            prompt: self.ctx.prompts.compile(task),
            repo_path: PathBuf::from(&task.repo_path),
            timeout: self.ctx.settings.provider_timeout,
        };
        let routed = self.ctx.router.execute(&request).await;

        if routed.is_success() {
            self.ctx.git.finish(task, &mut git_report).await;

            if let Err(e) = self.ctx.chain.expand(task, &routed.output) {
                warn!(task_id = task.id, "Follow-up expansion failed: {:#}", e);
            }

            db.update_fields(
                task.id,
                &TaskUpdate {
                    assigned_provider: Some(routed.provider.clone()),
                    branch_name: git_report.branch_name.clone(),
                    commit_hash: git_report.commit_hash.clone(),
                    git_detail: git_report.detail(),
                    output: Some(routed.output),
                    ..Default::default()
                },
            )?;
            let reason = format!("{} succeeded", routed.provider);
            self.finish(task.id, TaskStatus::Succeeded, &reason)?;
        } else {
            let detail = routed
                .outcome
                .detail()
                .unwrap_or("provider failed")
                .to_string();
            warn!(task_id = task.id, "Provider failure: {}", detail);

            db.update_fields(
                task.id,
                &TaskUpdate {
                    assigned_provider: Some(routed.provider.clone()),
                    branch_name: git_report.branch_name.clone(),
                    git_detail: git_report.detail(),
                    output: Some(routed.output),
                    error_kind: Some(ErrorCode::ProviderFailure),
                    error_detail: Some(detail),
                    ..Default::default()
                },
            )?;
            self.finish(task.id, TaskStatus::Failed, "provider failure")?;
        }

        db.require_task(task.id)
    }

    fn finish(&self, task_id: TaskId, status: TaskStatus, reason: &str) -> Result<()> {
        if !self.ctx.db.compare_and_set_status(
            task_id,
            TaskStatus::Running,
            status,
            Some(&self.id),
            Some(reason),
        )? {
            warn!(worker = %self.id, task_id, %status, "Task left running state before completion");
        }
        Ok(())
    }

    /// Best-effort: mark a task failed after an internal error mid-cycle.
    ///
    /// Returns true once the task is known to be out of `running`.
    fn fail_after_error(&self, task: &Task, err: &anyhow::Error) -> bool {
        match self.ctx.db.fail_running_task(
            task.id,
            Some(&self.id),
            ErrorCode::InternalError,
            &format!("{:#}", err),
            "internal error",
        ) {
            Ok(true) => {
                warn!(task_id = task.id, "Task failed after internal error");
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(task_id = task.id, "Could not record failure: {}", e);
                return false;
            }
        }

        match self.ctx.db.get_task(task.id) {
            Ok(Some(current)) if current.status == TaskStatus::Selected => {
                self.requeue_after_error(task);
                true
            }
            Ok(Some(current)) => current.status != TaskStatus::Running,
            Ok(None) => true,
            Err(e) => {
                warn!(task_id = task.id, "Could not read task state: {}", e);
                false
            }
        }
    }

    /// Best-effort: hand a selected task back to the queue after an error.
    fn requeue_after_error(&self, task: &Task) {
        if let Err(e) = self
            .ctx
            .scheduler
            .release_to_queue(task, &self.id, "worker error before start")
        {
            warn!(worker = %self.id, task_id = task.id, "Could not requeue task: {}", e);
        }
    }

    fn reclaim_stale_locks(&self) {
        if let Err(e) = self.ctx.locks.reclaim_stale() {
            warn!(worker = %self.id, "Stale lock reclamation failed: {}", e);
        }
    }
}

/// N workers sharing one context.
pub struct WorkerPool {
    ctx: WorkerContext,
    count: usize,
}

impl WorkerPool {
    pub fn new(ctx: WorkerContext, count: usize) -> Self {
        Self {
            ctx,
            count: count.max(1),
        }
    }

    fn workers(&self) -> Vec<Worker> {
        let base = generate_worker_id();
        (0..self.count)
            .map(|i| Worker::with_id(format!("{}-{}", base, i + 1), self.ctx.clone()))
            .collect()
    }

    /// Run until `shutdown` turns true, then wait for in-flight tasks.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut set = JoinSet::new();
        for worker in self.workers() {
            let shutdown = shutdown.clone();
            set.spawn(async move { worker.run(shutdown).await });
        }
        info!(workers = self.count, "Worker pool started");

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!("Worker task panicked: {}", e);
            }
        }
        Ok(())
    }

    /// Run until the queue has nothing left that can make progress.
    pub async fn run_until_idle(&self) -> Result<()> {
        let mut set = JoinSet::new();
        for worker in self.workers() {
            set.spawn(async move { worker.run_until_idle().await });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Worker stopped with error: {:#}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => error!("Worker task panicked: {}", e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
