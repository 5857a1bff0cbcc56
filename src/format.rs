//! Output formatting utilities for markdown and JSON.

use crate::types::{RepoLock, Task, TaskSequenceEvent, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    #[default]
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

/// Render a millisecond timestamp as RFC 3339 (UTC).
pub fn format_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

/// One-line task summary: `[id] status | title | repo_path`.
pub fn format_task_line(task: &Task) -> String {
    format!(
        "[{}] {} | {} | {}",
        task.id, task.status, task.title, task.repo_path
    )
}

/// Format a single task as markdown, with its status history.
///
/// `blocked_by` carries the status of a failed or cancelled dependency.
pub fn format_task_markdown(
    task: &Task,
    history: &[TaskSequenceEvent],
    blocked_by: Option<TaskStatus>,
) -> String {
    let mut md = String::new();

    md.push_str(&format!("## Task {}: {}\n", task.id, task.title));
    md.push_str(&format!("- **status**: {}\n", task.status));
    md.push_str(&format!("- **priority**: {}\n", task.priority));
    md.push_str(&format!("- **repo_path**: `{}`\n", task.repo_path));
    md.push_str(&format!("- **created**: {}\n", format_timestamp(task.created_at)));

    if let Some(dep) = task.depends_on_task_id {
        md.push_str(&format!("- **depends_on**: {}\n", dep));
    }
    if let Some(status) = blocked_by {
        md.push_str(&format!(
            "- **dependency unsatisfiable**: dependency is {}\n",
            status
        ));
    }
    if let Some(parent) = task.parent_task_id {
        md.push_str(&format!("- **parent**: {}\n", parent));
    }
    if let Some(ref group) = task.chain_group_id {
        md.push_str(&format!("- **chain_group**: `{}`\n", group));
    }
    if task.dangerous_ok {
        md.push_str("- **dangerous_ok**: true\n");
    }
    if let Some(ref provider) = task.assigned_provider {
        md.push_str(&format!("- **provider**: {}\n", provider));
    }
    if let Some(ref worker) = task.worker_id {
        md.push_str(&format!("- **worker**: {}\n", worker));
    }
    if task.attempt_count > 0 {
        md.push_str(&format!("- **attempts**: {}\n", task.attempt_count));
    }
    if let Some(ref branch) = task.branch_name {
        md.push_str(&format!("- **branch**: `{}`\n", branch));
    }
    if let Some(ref commit) = task.commit_hash {
        md.push_str(&format!("- **commit**: `{}`\n", commit));
    }
    if let Some(code) = task.error_kind {
        md.push_str(&format!("- **error**: {}\n", code));
    }
    if let Some(ref detail) = task.error_detail {
        md.push_str(&format!("- **error_detail**: {}\n", detail));
    }
    if let Some(ref git) = task.git_detail {
        md.push_str(&format!("- **git**: {}\n", git));
    }

    md.push_str("\n### Request\n");
    md.push_str(&task.request);
    md.push('\n');

    if let Some(ref constraints) = task.constraints {
        md.push_str("\n### Constraints\n");
        md.push_str(constraints);
        md.push('\n');
    }

    if !task.acceptance.is_empty() {
        md.push_str("\n### Acceptance\n");
        for criterion in &task.acceptance {
            md.push_str(&format!("- {}\n", criterion));
        }
    }

    if !history.is_empty() {
        md.push_str("\n### History\n");
        for event in history {
            let who = event
                .worker_id
                .as_ref()
                .map(|w| format!(" @{}", w))
                .unwrap_or_default();
            let why = event
                .reason
                .as_ref()
                .map(|r| format!(" - _{}_", r))
                .unwrap_or_default();
            md.push_str(&format!(
                "- {} {}{}{}\n",
                format_timestamp(event.timestamp),
                event.status,
                who,
                why
            ));
        }
    }

    md
}

/// Format a list of tasks as markdown, grouped by status.
pub fn format_tasks_markdown(tasks: &[Task]) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Tasks ({})\n\n", tasks.len()));

    for status in TaskStatus::ALL {
        let in_state: Vec<&Task> = tasks.iter().filter(|t| t.status == status).collect();
        if in_state.is_empty() {
            continue;
        }
        md.push_str(&format!("## {}\n\n", format_state_name(status.as_str())));
        for task in in_state {
            md.push_str(&format_task_short(task));
        }
        md.push('\n');
    }

    md
}

/// Format a state name for display (capitalize, replace underscores with spaces).
fn format_state_name(state: &str) -> String {
    state
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a task in short form for lists.
fn format_task_short(task: &Task) -> String {
    let priority_marker = if task.priority > 0 {
        format!("(+{}) ", task.priority)
    } else if task.priority < 0 {
        format!("({}) ", task.priority)
    } else {
        String::new()
    };

    let dependency = task
        .depends_on_task_id
        .map(|d| format!(" [after {}]", d))
        .unwrap_or_default();

    let worker = task
        .worker_id
        .as_ref()
        .filter(|_| !task.status.is_terminal())
        .map(|w| format!(" @{}", w))
        .unwrap_or_default();

    format!(
        "- {}{} `#{}` {}{}{}\n",
        priority_marker, task.title, task.id, task.repo_path, dependency, worker,
    )
}

/// Format repository locks as markdown, marking each live or stale.
pub fn format_locks_markdown(locks: &[RepoLock], now: i64, ttl_ms: i64) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Repository locks ({})\n\n", locks.len()));
    for lock in locks {
        let state = if lock.is_live(now, ttl_ms) {
            "live"
        } else {
            "stale"
        };
        let task = lock
            .task_id
            .map(|id| format!(" task #{}", id))
            .unwrap_or_default();
        md.push_str(&format!(
            "- `{}` {} by {}{} (heartbeat {}s ago)\n",
            lock.repo_path,
            state,
            lock.worker_id,
            task,
            (now - lock.last_heartbeat).max(0) / 1000
        ));
    }

    md
}
