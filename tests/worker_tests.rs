//! Integration tests for the worker loop: safety gate, provider fallback,
//! follow-up chaining, per-repo mutual exclusion, git and notifications.

use agent_queue::cli::doctor::reconcile;
use agent_queue::config::Config;
use agent_queue::db::Database;
use agent_queue::error::ErrorCode;
use agent_queue::git::{CommitOutcome, GitClient, GitError, PushOutcome};
use agent_queue::lock::LockManager;
use agent_queue::notify::{CompletionNotice, Notifier, NotifyError};
use agent_queue::provider::{
    ProviderClient, ProviderOutcome, ProviderRequest, ProviderResponse, ProviderRouter,
};
use agent_queue::types::{LockGrant, NewTask, TaskFilter, TaskStatus};
use agent_queue::worker::{CycleOutcome, Worker, WorkerContext, WorkerPool};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Provider that replays canned responses and counts calls.
struct FakeProvider {
    name: String,
    responses: Mutex<Vec<ProviderResponse>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeProvider {
    fn new(name: &str, responses: Vec<ProviderResponse>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn succeeding(name: &str, output: &str) -> Arc<Self> {
        Self::new(name, vec![ok(output)])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &ProviderRequest) -> ProviderResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses.first().cloned().unwrap_or_else(|| ok("done"))
        }
    }
}

fn ok(output: &str) -> ProviderResponse {
    ProviderResponse {
        raw_output: output.to_string(),
        exit_code: Some(0),
        outcome: ProviderOutcome::Success,
    }
}

fn rate_limited() -> ProviderResponse {
    ProviderResponse {
        raw_output: "Error: rate limit exceeded".to_string(),
        exit_code: Some(1),
        outcome: ProviderOutcome::RateLimited("rate limit exceeded".to_string()),
    }
}

fn failed(detail: &str) -> ProviderResponse {
    ProviderResponse {
        raw_output: detail.to_string(),
        exit_code: Some(2),
        outcome: ProviderOutcome::Failure(detail.to_string()),
    }
}

/// Provider that records how many executions overlap per repository.
struct OverlapTracker {
    in_flight: Mutex<HashMap<String, usize>>,
    max_seen: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl ProviderClient for OverlapTracker {
    fn name(&self) -> &str {
        "tracker"
    }

    async fn execute(&self, request: &ProviderRequest) -> ProviderResponse {
        let repo = request.repo_path.to_string_lossy().to_string();
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let count = in_flight.entry(repo.clone()).or_insert(0);
            *count += 1;
            self.max_seen.fetch_max(*count, Ordering::SeqCst);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(30)).await;

        if let Some(count) = self.in_flight.lock().unwrap().get_mut(&repo) {
            *count -= 1;
        }
        ok("done")
    }
}

/// Git client that pretends every path is a repository.
#[derive(Default)]
struct FakeGit {
    branches: Mutex<Vec<String>>,
    commit: Option<String>,
    push_fails: bool,
}

#[async_trait]
impl GitClient for FakeGit {
    async fn is_repo(&self, _repo: &Path) -> bool {
        true
    }

    async fn ensure_branch(&self, _repo: &Path, name: &str) -> Result<(), GitError> {
        self.branches.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn current_branch(&self, _repo: &Path) -> Result<String, GitError> {
        Ok("main".to_string())
    }

    async fn commit_all(&self, _repo: &Path, _message: &str) -> Result<CommitOutcome, GitError> {
        Ok(match self.commit {
            Some(ref hash) => CommitOutcome::Committed(hash.clone()),
            None => CommitOutcome::Skipped,
        })
    }

    async fn push(&self, _repo: &Path, _remote: &str, _branch: &str) -> PushOutcome {
        if self.push_fails {
            PushOutcome::Failed("remote rejected".to_string())
        } else {
            PushOutcome::Pushed
        }
    }
}

/// Notifier that keeps every notice.
#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<CompletionNotice>>,
    fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify_completion(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice.clone());
        if self.fail {
            return Err(NotifyError::Api {
                status: 500,
                body: "down".to_string(),
            });
        }
        Ok(())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.workers.idle_backoff_ms = 10;
    config.workers.blocked_backoff_ms = 10;
    config.git.enabled = false;
    config
}

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn context(
    db: &Database,
    config: &Config,
    router: ProviderRouter,
    notifier: Arc<RecordingNotifier>,
) -> WorkerContext {
    WorkerContext::new(
        db.clone(),
        config,
        router,
        Arc::new(FakeGit::default()),
        notifier,
    )
}

fn single(provider: Arc<FakeProvider>) -> ProviderRouter {
    ProviderRouter::new(provider, None)
}

/// Make every write of a final status for `task_id` fail.
fn refuse_completion(db: &Database, task_id: i64) {
    db.with_conn(|conn| {
        conn.execute_batch(&format!(
            "CREATE TRIGGER refuse_completion BEFORE UPDATE OF status ON tasks
             WHEN OLD.id = {} AND NEW.status IN ('succeeded', 'failed')
             BEGIN SELECT RAISE(ABORT, 'simulated store failure'); END;",
            task_id
        ))?;
        Ok(())
    })
    .unwrap();
}

fn allow_completion(db: &Database) {
    db.with_conn(|conn| {
        conn.execute_batch("DROP TRIGGER refuse_completion")?;
        Ok(())
    })
    .unwrap();
}

#[tokio::test]
async fn successful_task_records_provider_and_output() {
    let db = setup_db();
    let task = db
        .create_task(NewTask::new("Fix", "/srv/app", "Fix the login bug"))
        .unwrap();
    let provider = FakeProvider::succeeding("claude", "Summary: fixed it");
    let notifier = Arc::new(RecordingNotifier::default());
    let worker = Worker::with_id(
        "w1",
        context(&db, &test_config(), single(provider.clone()), notifier.clone()),
    );

    let outcome = worker.run_once().await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Processed {
            task_id: task.id,
            status: TaskStatus::Succeeded
        }
    );

    let done = db.require_task(task.id).unwrap();
    assert_eq!(done.assigned_provider.as_deref(), Some("claude"));
    assert_eq!(done.output.as_deref(), Some("Summary: fixed it"));
    assert_eq!(done.worker_id.as_deref(), Some("w1"));
    assert!(done.error_kind.is_none());
    assert!(db.get_lock("/srv/app").unwrap().is_none());

    let prompts = provider.prompts.lock().unwrap();
    assert!(prompts[0].contains("Fix the login bug"));

    let notices = notifier.notices.lock().unwrap();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].summary, "fixed it");

    let statuses: Vec<String> = db
        .get_task_history(task.id)
        .unwrap()
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(statuses, vec!["queued", "selected", "running", "succeeded"]);
}

#[tokio::test]
async fn empty_queue_reports_empty() {
    let db = setup_db();
    let worker = Worker::with_id(
        "w1",
        context(
            &db,
            &test_config(),
            single(FakeProvider::succeeding("claude", "x")),
            Arc::new(RecordingNotifier::default()),
        ),
    );
    assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Empty);
}

#[tokio::test]
async fn safety_gate_blocks_without_calling_provider() {
    let db = setup_db();
    let task = db
        .create_task(NewTask::new("Clean", "/srv/app", "Run rm -rf build/ then rebuild"))
        .unwrap();
    let provider = FakeProvider::succeeding("claude", "done");
    let notifier = Arc::new(RecordingNotifier::default());
    let worker = Worker::with_id(
        "w1",
        context(&db, &test_config(), single(provider.clone()), notifier.clone()),
    );

    worker.run_once().await.unwrap();

    let done = db.require_task(task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error_kind, Some(ErrorCode::SafetyViolation));
    assert!(done.error_detail.unwrap().contains("rm -rf"));
    assert_eq!(provider.calls(), 0);
    assert!(db.get_lock("/srv/app").unwrap().is_none());
    assert_eq!(notifier.notices.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn dangerous_ok_bypasses_safety_gate() {
    let db = setup_db();
    let task = db
        .create_task(NewTask::new("Clean", "/srv/app", "rm -rf build/").dangerous_ok(true))
        .unwrap();
    let provider = FakeProvider::succeeding("claude", "done");
    let worker = Worker::with_id(
        "w1",
        context(
            &db,
            &test_config(),
            single(provider.clone()),
            Arc::new(RecordingNotifier::default()),
        ),
    );

    worker.run_once().await.unwrap();

    assert_eq!(db.require_task(task.id).unwrap().status, TaskStatus::Succeeded);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn rate_limited_primary_falls_back_once() {
    let db = setup_db();
    let task = db.create_task(NewTask::new("t", "/srv/app", "work")).unwrap();
    let primary = FakeProvider::new("claude", vec![rate_limited()]);
    let fallback = FakeProvider::succeeding("codex", "Summary: done by codex");
    let router = ProviderRouter::new(
        primary.clone(),
        Some(fallback.clone() as Arc<dyn ProviderClient>),
    );
    let worker = Worker::with_id(
        "w1",
        context(&db, &test_config(), router, Arc::new(RecordingNotifier::default())),
    );

    worker.run_once().await.unwrap();

    let done = db.require_task(task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert_eq!(done.assigned_provider.as_deref(), Some("codex"));
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);
}

#[tokio::test]
async fn both_providers_failing_fails_task_with_both_details() {
    let db = setup_db();
    let task = db.create_task(NewTask::new("t", "/srv/app", "work")).unwrap();
    let primary = FakeProvider::new("claude", vec![rate_limited()]);
    let fallback = FakeProvider::new("codex", vec![failed("codex crashed")]);
    let router = ProviderRouter::new(
        primary.clone(),
        Some(fallback.clone() as Arc<dyn ProviderClient>),
    );
    let worker = Worker::with_id(
        "w1",
        context(&db, &test_config(), router, Arc::new(RecordingNotifier::default())),
    );

    worker.run_once().await.unwrap();

    let done = db.require_task(task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error_kind, Some(ErrorCode::ProviderFailure));
    let detail = done.error_detail.unwrap();
    assert!(detail.contains("claude"), "{}", detail);
    assert!(detail.contains("codex"), "{}", detail);
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);
}

#[tokio::test]
async fn follow_up_block_enqueues_selectable_child() {
    let db = setup_db();
    let parent = db
        .create_task(NewTask::new("Parser", "/srv/app", "Write the parser"))
        .unwrap();
    let output = "Summary: parser written\n```json\n{\"followups\":[{\"title\":\"T\",\"request\":\"R\",\"depends_on\":\"this\"}]}\n```\n";
    let provider = FakeProvider::new("claude", vec![ok(output), ok("Summary: child done")]);
    let worker = Worker::with_id(
        "w1",
        context(
            &db,
            &test_config(),
            single(provider.clone()),
            Arc::new(RecordingNotifier::default()),
        ),
    );

    worker.run_once().await.unwrap();

    let parent = db.require_task(parent.id).unwrap();
    assert_eq!(parent.status, TaskStatus::Succeeded);

    let children = db
        .list_tasks(&TaskFilter::default().with_parent(parent.id))
        .unwrap();
    assert_eq!(children.len(), 1);
    let child = &children[0];
    assert_eq!(child.title, "T");
    assert_eq!(child.request, "R");
    assert_eq!(child.depends_on_task_id, Some(parent.id));
    assert_eq!(child.parent_task_id, Some(parent.id));
    assert_eq!(child.repo_path, "/srv/app");
    assert_eq!(child.status, TaskStatus::Queued);
    assert!(child.chain_group_id.is_some());
    assert_eq!(child.chain_group_id, parent.chain_group_id);
    assert!(!child.dangerous_ok);

    let outcome = worker.run_once().await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Processed {
            task_id: child.id,
            status: TaskStatus::Succeeded
        }
    );
}

#[tokio::test]
async fn malformed_follow_up_block_creates_nothing() {
    let db = setup_db();
    let parent = db
        .create_task(NewTask::new("Parser", "/srv/app", "Write the parser"))
        .unwrap();
    let output = "Summary: ok\n```json\n{\"followups\":[{\"title\":\"T\"\n```\n";
    let worker = Worker::with_id(
        "w1",
        context(
            &db,
            &test_config(),
            single(FakeProvider::succeeding("claude", output)),
            Arc::new(RecordingNotifier::default()),
        ),
    );

    worker.run_once().await.unwrap();

    assert_eq!(db.require_task(parent.id).unwrap().status, TaskStatus::Succeeded);
    assert!(
        db.list_tasks(&TaskFilter::default().with_parent(parent.id))
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn locked_repository_sends_task_back_to_queue() {
    let db = setup_db();
    let task = db.create_task(NewTask::new("t", "/srv/app", "work")).unwrap();
    let config = test_config();
    let provider = FakeProvider::succeeding("claude", "done");
    let ctx = context(
        &db,
        &config,
        single(provider.clone()),
        Arc::new(RecordingNotifier::default()),
    );
    let worker = Worker::with_id("w1", ctx.clone());

    // Select first, then let another worker grab the lock before acquisition.
    let agent_queue::scheduler::Selection::Task(selected) = ctx.scheduler.select_next("w1").unwrap()
    else {
        panic!("expected a task");
    };
    assert_eq!(selected.id, task.id);
    assert_eq!(
        ctx.locks.acquire("/srv/app", "other", None).unwrap(),
        LockGrant::Granted
    );
    ctx.scheduler
        .release_to_queue(&selected, "w1", "test reset")
        .unwrap();

    // The live lock hides the task from selection entirely.
    assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Blocked);
    assert_eq!(db.require_task(task.id).unwrap().status, TaskStatus::Queued);
    assert_eq!(provider.calls(), 0);

    ctx.locks.release("/srv/app", "other").unwrap();
    worker.run_once().await.unwrap();
    assert_eq!(db.require_task(task.id).unwrap().status, TaskStatus::Succeeded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_running_task_per_repository() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path().join("queue.db")).unwrap();
    for i in 0..4 {
        db.create_task(NewTask::new(format!("shared {}", i), "/srv/shared", "work"))
            .unwrap();
    }
    for i in 0..2 {
        db.create_task(NewTask::new(format!("other {}", i), format!("/srv/other-{}", i), "work"))
            .unwrap();
    }

    let tracker = Arc::new(OverlapTracker {
        in_flight: Mutex::new(HashMap::new()),
        max_seen: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    });
    let ctx = WorkerContext::new(
        db.clone(),
        &test_config(),
        ProviderRouter::new(tracker.clone(), None),
        Arc::new(FakeGit::default()),
        Arc::new(RecordingNotifier::default()),
    );

    tokio::time::timeout(Duration::from_secs(30), WorkerPool::new(ctx, 3).run_until_idle())
        .await
        .expect("pool did not drain")
        .unwrap();

    assert_eq!(tracker.calls.load(Ordering::SeqCst), 6);
    assert_eq!(tracker.max_seen.load(Ordering::SeqCst), 1);
    let done = db
        .list_tasks(&TaskFilter::default().with_status(TaskStatus::Succeeded))
        .unwrap();
    assert_eq!(done.len(), 6);

    // Running intervals on the shared repository never overlap.
    let mut intervals: Vec<(i64, i64)> = db
        .list_tasks(&TaskFilter::default().with_repo("/srv/shared"))
        .unwrap()
        .iter()
        .map(|t| (t.started_at.unwrap(), t.finished_at.unwrap()))
        .collect();
    intervals.sort();
    for pair in intervals.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlap: {:?}", pair);
    }
}

#[tokio::test]
async fn drain_stops_when_only_unsatisfiable_tasks_remain() {
    let db = setup_db();
    let first = db.create_task(NewTask::new("first", "/srv/app", "work")).unwrap();
    let second = db
        .create_task(NewTask::new("second", "/srv/app", "more").depends_on(first.id))
        .unwrap();
    let provider = FakeProvider::new("claude", vec![failed("boom")]);
    let ctx = context(
        &db,
        &test_config(),
        single(provider),
        Arc::new(RecordingNotifier::default()),
    );

    tokio::time::timeout(Duration::from_secs(10), WorkerPool::new(ctx, 2).run_until_idle())
        .await
        .expect("pool did not stop")
        .unwrap();

    assert_eq!(db.require_task(first.id).unwrap().status, TaskStatus::Failed);
    assert_eq!(
        db.require_task(second.id).unwrap().status,
        TaskStatus::WaitingDependency
    );
}

#[tokio::test]
async fn git_results_are_recorded_on_the_task() {
    let db = setup_db();
    let task = db
        .create_task(NewTask::new("Add health endpoint", "/srv/app", "work"))
        .unwrap();
    let mut config = test_config();
    config.git.enabled = true;
    config.git.auto_push = true;
    let git = Arc::new(FakeGit {
        commit: Some("abc123".to_string()),
        push_fails: true,
        ..Default::default()
    });
    let ctx = WorkerContext::new(
        db.clone(),
        &config,
        single(FakeProvider::succeeding("claude", "done")),
        git.clone(),
        Arc::new(RecordingNotifier::default()),
    );

    Worker::with_id("w1", ctx).run_once().await.unwrap();

    let done = db.require_task(task.id).unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    let branch = format!("agent/task-{}-add-health-endpoint", task.id);
    assert_eq!(done.branch_name.as_deref(), Some(branch.as_str()));
    assert_eq!(done.commit_hash.as_deref(), Some("abc123"));
    let detail = done.git_detail.unwrap();
    assert!(detail.contains("push failed: remote rejected"), "{}", detail);
    assert_eq!(git.branches.lock().unwrap().as_slice(), [branch]);
}

#[tokio::test]
async fn notification_failure_does_not_affect_task() {
    let db = setup_db();
    let task = db.create_task(NewTask::new("t", "/srv/app", "work")).unwrap();
    let notifier = Arc::new(RecordingNotifier {
        fail: true,
        ..Default::default()
    });
    let worker = Worker::with_id(
        "w1",
        context(
            &db,
            &test_config(),
            single(FakeProvider::succeeding("claude", "done")),
            notifier.clone(),
        ),
    );

    worker.run_once().await.unwrap();

    assert_eq!(db.require_task(task.id).unwrap().status, TaskStatus::Succeeded);
    assert_eq!(notifier.notices.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn task_stuck_in_running_keeps_its_repository_locked() {
    let db = setup_db();
    let stuck = db
        .create_task(NewTask::new("first", "/srv/app", "work").with_priority(5))
        .unwrap();
    let next = db.create_task(NewTask::new("second", "/srv/app", "more")).unwrap();
    refuse_completion(&db, stuck.id);

    let provider = FakeProvider::succeeding("claude", "done");
    let worker = Worker::with_id(
        "w1",
        context(
            &db,
            &test_config(),
            single(provider.clone()),
            Arc::new(RecordingNotifier::default()),
        ),
    );

    let err = worker.run_once().await.unwrap_err();
    assert!(format!("{:#}", err).contains("simulated store failure"));
    assert_eq!(db.require_task(stuck.id).unwrap().status, TaskStatus::Running);
    assert_eq!(db.get_lock("/srv/app").unwrap().unwrap().worker_id, "w1");

    // The second task on the same repository must not start.
    assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Blocked);
    assert_eq!(db.require_task(next.id).unwrap().status, TaskStatus::Queued);
    assert_eq!(provider.calls(), 1);

    // Even after the lease goes stale, only reconciling frees the repository.
    let expired = LockManager::new(db.clone(), Duration::ZERO, Duration::from_secs(10));
    assert_eq!(expired.reclaim_stale().unwrap().len(), 1);
    assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Blocked);

    allow_completion(&db);
    let report = reconcile(&db, &expired).unwrap();
    assert_eq!(report.failed, vec![stuck.id]);

    assert_eq!(
        worker.run_once().await.unwrap(),
        CycleOutcome::Processed {
            task_id: next.id,
            status: TaskStatus::Succeeded
        }
    );
}

#[tokio::test]
async fn drain_survives_a_failed_cycle() {
    let db = setup_db();
    let stuck = db
        .create_task(NewTask::new("first", "/srv/app", "work").with_priority(5))
        .unwrap();
    let next = db.create_task(NewTask::new("second", "/srv/app", "more")).unwrap();
    let other = db.create_task(NewTask::new("third", "/srv/other", "work")).unwrap();
    refuse_completion(&db, stuck.id);

    let mut config = test_config();
    config.locks.ttl_seconds = 0;
    let ctx = context(
        &db,
        &config,
        single(FakeProvider::succeeding("claude", "done")),
        Arc::new(RecordingNotifier::default()),
    );

    tokio::time::timeout(Duration::from_secs(10), Worker::with_id("w1", ctx).run_until_idle())
        .await
        .expect("worker did not stop")
        .unwrap();

    assert_eq!(db.require_task(stuck.id).unwrap().status, TaskStatus::Running);
    assert_eq!(db.require_task(next.id).unwrap().status, TaskStatus::Queued);
    assert_eq!(db.require_task(other.id).unwrap().status, TaskStatus::Succeeded);
}

#[tokio::test]
async fn lock_store_error_returns_selection_to_queue() {
    let db = setup_db();
    let task = db.create_task(NewTask::new("t", "/srv/app", "work")).unwrap();
    db.with_conn(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER refuse_lock BEFORE INSERT ON repo_locks
             BEGIN SELECT RAISE(ABORT, 'lock store failure'); END;",
        )?;
        Ok(())
    })
    .unwrap();

    let provider = FakeProvider::succeeding("claude", "done");
    let worker = Worker::with_id(
        "w1",
        context(
            &db,
            &test_config(),
            single(provider.clone()),
            Arc::new(RecordingNotifier::default()),
        ),
    );

    assert!(worker.run_once().await.is_err());
    let task = db.require_task(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert!(task.worker_id.is_none());
    assert_eq!(provider.calls(), 0);
}
