//! Core types for the task queue.

use crate::error::{ErrorCode, TaskError, TaskResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task identifier (monotonic, assigned by the store).
pub type TaskId = i64;

/// Task priority as an integer (higher = more urgent).
/// Default is 0.
pub type Priority = i32;

/// Routing policy recorded on new tasks.
pub const DEFAULT_PREFERRED_PROVIDER: &str = "primary_first";

/// Persisted task status.
///
/// ```text
/// waiting_dependency -> queued | cancelled
/// queued             -> selected | cancelled
/// selected           -> queued | running
/// running            -> succeeded | failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    WaitingDependency,
    Selected,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Queued,
        TaskStatus::WaitingDependency,
        TaskStatus::Selected,
        TaskStatus::Running,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::WaitingDependency => "waiting_dependency",
            TaskStatus::Selected => "selected",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "waiting_dependency" => Some(TaskStatus::WaitingDependency),
            "selected" => Some(TaskStatus::Selected),
            "running" => Some(TaskStatus::Running),
            "succeeded" => Some(TaskStatus::Succeeded),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" | "canceled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (WaitingDependency, Queued)
                | (WaitingDependency, Cancelled)
                | (Queued, Selected)
                | (Queued, Cancelled)
                | (Selected, Queued)
                | (Selected, Running)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub request: String,
    pub constraints: Option<String>,
    pub acceptance: Vec<String>,
    pub repo_path: String,
    pub priority: Priority,
    pub status: TaskStatus,

    // Chaining
    pub depends_on_task_id: Option<TaskId>,
    pub parent_task_id: Option<TaskId>,
    pub chain_group_id: Option<String>,

    pub dangerous_ok: bool,
    pub preferred_provider: String,
    pub assigned_provider: Option<String>,
    pub worker_id: Option<String>,

    // Git workflow results
    pub branch_name: Option<String>,
    pub commit_hash: Option<String>,

    pub attempt_count: i32,
    pub error_kind: Option<ErrorCode>,
    pub error_detail: Option<String>,
    pub git_detail: Option<String>,
    pub output: Option<String>,

    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub updated_at: i64,
}

impl Task {
    /// Text inspected by the safety gate: request, constraints and acceptance criteria.
    pub fn safety_text(&self) -> String {
        let mut text = self.request.clone();
        if let Some(ref constraints) = self.constraints {
            text.push('\n');
            text.push_str(constraints);
        }
        for criterion in &self.acceptance {
            text.push('\n');
            text.push_str(criterion);
        }
        text
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            title: self.title.clone(),
            status: self.status,
            priority: self.priority,
            repo_path: self.repo_path.clone(),
            depends_on_task_id: self.depends_on_task_id,
        }
    }
}

/// Compact task representation for list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub repo_path: String,
    pub depends_on_task_id: Option<TaskId>,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub request: String,
    pub repo_path: String,
    #[serde(default)]
    pub constraints: Option<String>,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub depends_on_task_id: Option<TaskId>,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    #[serde(default)]
    pub chain_group_id: Option<String>,
    #[serde(default)]
    pub dangerous_ok: bool,
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

impl NewTask {
    pub fn new(
        title: impl Into<String>,
        repo_path: impl Into<String>,
        request: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            repo_path: repo_path.into(),
            request: request.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }

    pub fn with_acceptance(mut self, acceptance: Vec<String>) -> Self {
        self.acceptance = acceptance;
        self
    }

    pub fn depends_on(mut self, task_id: TaskId) -> Self {
        self.depends_on_task_id = Some(task_id);
        self
    }

    pub fn with_parent(mut self, task_id: TaskId) -> Self {
        self.parent_task_id = Some(task_id);
        self
    }

    pub fn with_chain_group(mut self, group: impl Into<String>) -> Self {
        self.chain_group_id = Some(group.into());
        self
    }

    pub fn dangerous_ok(mut self, allowed: bool) -> Self {
        self.dangerous_ok = allowed;
        self
    }

    /// Reject malformed input before it reaches the store.
    pub fn validate(&self) -> TaskResult<()> {
        if self.title.trim().is_empty() {
            return Err(TaskError::missing_field("title"));
        }
        if self.request.trim().is_empty() {
            return Err(TaskError::missing_field("request"));
        }
        if self.repo_path.trim().is_empty() {
            return Err(TaskError::missing_field("repo_path"));
        }
        if let Some(ref group) = self.chain_group_id
            && group.trim().is_empty()
        {
            return Err(TaskError::invalid_value(
                "chain_group_id",
                "chain_group_id cannot be blank",
            ));
        }
        Ok(())
    }
}

/// Field updates applied by the worker. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub assigned_provider: Option<String>,
    pub branch_name: Option<String>,
    pub commit_hash: Option<String>,
    pub error_kind: Option<ErrorCode>,
    pub error_detail: Option<String>,
    pub git_detail: Option<String>,
    pub output: Option<String>,
}

impl TaskUpdate {
    pub fn failure(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            error_kind: Some(code),
            error_detail: Some(detail.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assigned_provider.is_none()
            && self.branch_name.is_none()
            && self.commit_hash.is_none()
            && self.error_kind.is_none()
            && self.error_detail.is_none()
            && self.git_detail.is_none()
            && self.output.is_none()
    }
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Vec<TaskStatus>,
    pub repo_path: Option<String>,
    pub chain_group_id: Option<String>,
    pub parent_task_id: Option<TaskId>,
    pub limit: Option<i64>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_repo(mut self, repo_path: impl Into<String>) -> Self {
        self.repo_path = Some(repo_path.into());
        self
    }

    pub fn with_parent(mut self, task_id: TaskId) -> Self {
        self.parent_task_id = Some(task_id);
        self
    }
}

/// An exclusive lease on a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoLock {
    pub repo_path: String,
    pub worker_id: String,
    pub task_id: Option<TaskId>,
    pub acquired_at: i64,
    pub last_heartbeat: i64,
}

impl RepoLock {
    /// A lock is live while its heartbeat is younger than the TTL.
    pub fn is_live(&self, now: i64, ttl_ms: i64) -> bool {
        now - self.last_heartbeat < ttl_ms
    }
}

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockGrant {
    Granted,
    Denied { holder: String },
}

impl LockGrant {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockGrant::Granted)
    }
}

/// A task status transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSequenceEvent {
    pub id: i64,
    pub task_id: TaskId,
    pub worker_id: Option<String>,
    pub status: String,
    pub reason: Option<String>,
    pub timestamp: i64,
    pub end_timestamp: Option<i64>,
}

/// Aggregate counts by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: i64,
    pub waiting_dependency: i64,
    pub selected: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl QueueCounts {
    pub fn pending(&self) -> i64 {
        self.queued + self.waiting_dependency
    }

    pub(crate) fn add(&mut self, status: TaskStatus, count: i64) {
        match status {
            TaskStatus::Queued => self.queued += count,
            TaskStatus::WaitingDependency => self.waiting_dependency += count,
            TaskStatus::Selected => self.selected += count,
            TaskStatus::Running => self.running += count,
            TaskStatus::Succeeded => self.succeeded += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Cancelled => self.cancelled += count,
        }
    }
}
