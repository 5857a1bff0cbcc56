//! Task CRUD, compare-and-swap status transitions and selection queries.

use super::state_transitions::record_state_transition;
use super::{Database, now_ms};
use crate::error::{ErrorCode, TaskError};
use crate::types::{
    DEFAULT_PREFERRED_PROVIDER, NewTask, QueueCounts, Task, TaskFilter, TaskId, TaskStatus,
    TaskUpdate,
};
use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

fn parse_status_column(value: String) -> rusqlite::Result<TaskStatus> {
    TaskStatus::from_str(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("unknown task status '{}'", value).into(),
        )
    })
}

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let acceptance_json: String = row.get("acceptance")?;
    let error_kind: Option<String> = row.get("error_kind")?;
    let dangerous_ok: i64 = row.get("dangerous_ok")?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        request: row.get("request")?,
        constraints: row.get("constraints")?,
        acceptance: serde_json::from_str(&acceptance_json).unwrap_or_default(),
        repo_path: row.get("repo_path")?,
        priority: row.get("priority")?,
        status: parse_status_column(status)?,
        depends_on_task_id: row.get("depends_on_task_id")?,
        parent_task_id: row.get("parent_task_id")?,
        chain_group_id: row.get("chain_group_id")?,
        dangerous_ok: dangerous_ok != 0,
        preferred_provider: row.get("preferred_provider")?,
        assigned_provider: row.get("assigned_provider")?,
        worker_id: row.get("worker_id")?,
        branch_name: row.get("branch_name")?,
        commit_hash: row.get("commit_hash")?,
        attempt_count: row.get("attempt_count")?,
        error_kind: error_kind.as_deref().and_then(ErrorCode::from_str),
        error_detail: row.get("error_detail")?,
        git_detail: row.get("git_detail")?,
        output: row.get("output")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
pub(crate) fn get_task_internal(conn: &Connection, task_id: TaskId) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE id = ?1",
            params![task_id],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

fn get_status_internal(conn: &Connection, task_id: TaskId) -> Result<Option<TaskStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM tasks WHERE id = ?1",
            params![task_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(status.as_deref().and_then(TaskStatus::from_str))
}

/// Insert a validated task and record its initial status.
///
/// A task whose dependency has not yet succeeded starts in
/// `waiting_dependency`; everything else starts `queued`.
fn insert_task_internal(conn: &Connection, input: &NewTask) -> Result<TaskId> {
    input.validate()?;

    let initial_status = match input.depends_on_task_id {
        Some(dep_id) => match get_status_internal(conn, dep_id)? {
            Some(TaskStatus::Succeeded) => TaskStatus::Queued,
            Some(_) => TaskStatus::WaitingDependency,
            None => {
                return Err(TaskError::invalid_value(
                    "depends_on_task_id",
                    format!("Dependency task {} does not exist", dep_id),
                )
                .into());
            }
        },
        None => TaskStatus::Queued,
    };

    if let Some(parent_id) = input.parent_task_id
        && get_status_internal(conn, parent_id)?.is_none()
    {
        return Err(TaskError::invalid_value(
            "parent_task_id",
            format!("Parent task {} does not exist", parent_id),
        )
        .into());
    }

    let now = now_ms();
    let acceptance_json = serde_json::to_string(&input.acceptance)?;
    let preferred_provider = input
        .preferred_provider
        .as_deref()
        .unwrap_or(DEFAULT_PREFERRED_PROVIDER);

    conn.execute(
        "INSERT INTO tasks (
            title, repo_path, request, constraints, acceptance, priority, status,
            preferred_provider, depends_on_task_id, parent_task_id, chain_group_id,
            dangerous_ok, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            input.title.trim(),
            input.repo_path.trim(),
            &input.request,
            &input.constraints,
            acceptance_json,
            input.priority,
            initial_status.as_str(),
            preferred_provider,
            input.depends_on_task_id,
            input.parent_task_id,
            &input.chain_group_id,
            input.dangerous_ok as i64,
            now,
            now,
        ],
    )?;

    let task_id = conn.last_insert_rowid();
    record_state_transition(conn, task_id, initial_status, None, Some("created"))?;

    Ok(task_id)
}

/// Atomic status swap. Returns false when the task is not in `from`.
fn cas_status_internal(
    conn: &Connection,
    task_id: TaskId,
    from: TaskStatus,
    to: TaskStatus,
    worker_id: Option<&str>,
    reason: Option<&str>,
) -> Result<bool> {
    let now = now_ms();

    let updated = conn.execute(
        "UPDATE tasks SET
            status = ?1,
            updated_at = ?2,
            worker_id = CASE
                WHEN ?1 = 'selected' THEN ?3
                WHEN ?1 = 'queued' THEN NULL
                ELSE worker_id END,
            attempt_count = attempt_count + (CASE WHEN ?1 = 'selected' THEN 1 ELSE 0 END),
            started_at = CASE WHEN ?1 = 'running' THEN ?2 ELSE started_at END,
            finished_at = CASE
                WHEN ?1 IN ('succeeded', 'failed', 'cancelled') THEN ?2
                ELSE finished_at END
         WHERE id = ?4 AND status = ?5",
        params![to.as_str(), now, worker_id, task_id, from.as_str()],
    )?;

    if updated == 0 {
        return Ok(false);
    }

    record_state_transition(conn, task_id, to, worker_id, reason)?;
    Ok(true)
}

/// Move every `waiting_dependency` dependent of `task_id` to `queued`.
fn promote_dependents_internal(conn: &Connection, task_id: TaskId) -> Result<Vec<TaskId>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM tasks WHERE depends_on_task_id = ?1 AND status = 'waiting_dependency'",
    )?;
    let dependents: Vec<TaskId> = stmt
        .query_map(params![task_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let reason = format!("dependency {} succeeded", task_id);
    let mut promoted = Vec::new();
    for dependent in dependents {
        if cas_status_internal(
            conn,
            dependent,
            TaskStatus::WaitingDependency,
            TaskStatus::Queued,
            None,
            Some(&reason),
        )? {
            promoted.push(dependent);
        }
    }
    Ok(promoted)
}

impl Database {
    /// Create a new task. Input is validated first.
    pub fn create_task(&self, input: NewTask) -> Result<Task> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let task_id = insert_task_internal(&tx, &input)?;
            let task = get_task_internal(&tx, task_id)?
                .ok_or_else(|| TaskError::task_not_found(task_id))?;
            tx.commit()?;
            Ok(task)
        })
    }

    /// Create follow-up tasks for `parent_id` in one transaction.
    ///
    /// The parent's chain group is reused when set; otherwise `minted_group`
    /// is written to the parent and shared by every follow-up. Returns the
    /// effective group and the created tasks.
    pub fn create_followups(
        &self,
        parent_id: TaskId,
        minted_group: &str,
        inputs: Vec<NewTask>,
    ) -> Result<(String, Vec<Task>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let updated = tx.execute(
                "UPDATE tasks SET chain_group_id = COALESCE(chain_group_id, ?1), updated_at = ?2
                 WHERE id = ?3",
                params![minted_group, now_ms(), parent_id],
            )?;
            if updated == 0 {
                return Err(TaskError::task_not_found(parent_id).into());
            }
            let group: String = tx.query_row(
                "SELECT chain_group_id FROM tasks WHERE id = ?1",
                params![parent_id],
                |row| row.get(0),
            )?;

            let mut created = Vec::with_capacity(inputs.len());
            for mut input in inputs {
                input.parent_task_id = Some(parent_id);
                input.chain_group_id = Some(group.clone());
                let task_id = insert_task_internal(&tx, &input)?;
                if let Some(task) = get_task_internal(&tx, task_id)? {
                    created.push(task);
                }
            }

            tx.commit()?;
            Ok((group, created))
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Get a task by ID, failing with `TaskNotFound` if it does not exist.
    pub fn require_task(&self, task_id: TaskId) -> Result<Task> {
        self.get_task(task_id)?
            .ok_or_else(|| TaskError::task_not_found(task_id).into())
    }

    /// List tasks matching the filter, newest first.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
            let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if !filter.statuses.is_empty() {
                let placeholders: Vec<String> = filter
                    .statuses
                    .iter()
                    .enumerate()
                    .map(|(i, _)| format!("?{}", param_values.len() + i + 1))
                    .collect();
                sql.push_str(&format!(" AND status IN ({})", placeholders.join(", ")));
                for status in &filter.statuses {
                    param_values.push(Box::new(status.as_str()));
                }
            }

            if let Some(ref repo) = filter.repo_path {
                sql.push_str(&format!(" AND repo_path = ?{}", param_values.len() + 1));
                param_values.push(Box::new(repo.clone()));
            }

            if let Some(ref group) = filter.chain_group_id {
                sql.push_str(&format!(" AND chain_group_id = ?{}", param_values.len() + 1));
                param_values.push(Box::new(group.clone()));
            }

            if let Some(parent_id) = filter.parent_task_id {
                sql.push_str(&format!(" AND parent_task_id = ?{}", param_values.len() + 1));
                param_values.push(Box::new(parent_id));
            }

            sql.push_str(" ORDER BY id DESC");

            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT ?{}", param_values.len() + 1));
                param_values.push(Box::new(limit));
            }

            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                param_values.iter().map(|b| b.as_ref()).collect();

            let tasks = stmt
                .query_map(param_refs.as_slice(), parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(tasks)
        })
    }

    /// Atomically move a task from `from` to `to`.
    ///
    /// Returns `Ok(false)` if the task was not in `from` (another worker won
    /// the race, or the task was cancelled). Transitions the state machine
    /// forbids fail with `InvalidTransition`. A successful move to
    /// `succeeded` promotes waiting dependents in the same transaction.
    pub fn compare_and_set_status(
        &self,
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        worker_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(TaskError::invalid_transition(task_id, from.as_str(), to.as_str()).into());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let changed = cas_status_internal(&tx, task_id, from, to, worker_id, reason)?;
            if changed && to == TaskStatus::Succeeded {
                let promoted = promote_dependents_internal(&tx, task_id)?;
                if !promoted.is_empty() {
                    tracing::debug!(task_id, ?promoted, "Promoted dependents to queued");
                }
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Apply field updates. Fields left as `None` keep their current value.
    pub fn update_fields(&self, task_id: TaskId, update: &TaskUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let now = now_ms();

        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET
                    assigned_provider = COALESCE(?1, assigned_provider),
                    branch_name = COALESCE(?2, branch_name),
                    commit_hash = COALESCE(?3, commit_hash),
                    error_kind = COALESCE(?4, error_kind),
                    error_detail = COALESCE(?5, error_detail),
                    git_detail = COALESCE(?6, git_detail),
                    output = COALESCE(?7, output),
                    updated_at = ?8
                 WHERE id = ?9",
                params![
                    &update.assigned_provider,
                    &update.branch_name,
                    &update.commit_hash,
                    update.error_kind.map(|code| code.as_str()),
                    &update.error_detail,
                    &update.git_detail,
                    &update.output,
                    now,
                    task_id,
                ],
            )?;

            if updated == 0 {
                return Err(TaskError::task_not_found(task_id).into());
            }
            Ok(())
        })
    }

    /// Cancel a task that has not been selected yet.
    /// Returns false if the task is past the point where cancellation applies.
    pub fn cancel_task(&self, task_id: TaskId) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let status = get_status_internal(&tx, task_id)?
                .ok_or_else(|| TaskError::task_not_found(task_id))?;

            if !status.can_transition_to(TaskStatus::Cancelled) {
                return Ok(false);
            }

            let changed = cas_status_internal(
                &tx,
                task_id,
                status,
                TaskStatus::Cancelled,
                None,
                Some("cancelled by operator"),
            )?;
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Queued tasks that may run now, best first.
    ///
    /// Excludes tasks whose dependency has not succeeded and tasks whose
    /// repo_path holds a lock with a heartbeat newer than `lock_cutoff`.
    pub fn eligible_candidates(&self, lock_cutoff: i64, limit: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.* FROM tasks t
                 WHERE t.status = 'queued'
                 AND (
                     t.depends_on_task_id IS NULL
                     OR EXISTS (
                         SELECT 1 FROM tasks dep
                         WHERE dep.id = t.depends_on_task_id AND dep.status = 'succeeded'
                     )
                 )
                 AND NOT EXISTS (
                     SELECT 1 FROM repo_locks l
                     WHERE l.repo_path = t.repo_path AND l.last_heartbeat > ?1
                 )
                 AND NOT EXISTS (
                     SELECT 1 FROM tasks r
                     WHERE r.repo_path = t.repo_path AND r.status = 'running'
                 )
                 ORDER BY t.priority DESC, t.created_at ASC, t.id ASC
                 LIMIT ?2",
            )?;

            let tasks = stmt
                .query_map(params![lock_cutoff, limit], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(tasks)
        })
    }

    /// Task counts by status.
    pub fn queue_counts(&self) -> Result<QueueCounts> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| {
                    let status: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    Ok((status, count))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut counts = QueueCounts::default();
            for (status, count) in rows {
                if let Some(status) = TaskStatus::from_str(&status) {
                    counts.add(status, count);
                }
            }
            Ok(counts)
        })
    }

    /// Running tasks that no live lock is guarding (their worker likely crashed).
    pub fn orphaned_running_tasks(&self, lock_cutoff: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.* FROM tasks t
                 WHERE t.status = 'running'
                 AND NOT EXISTS (
                     SELECT 1 FROM repo_locks l
                     WHERE l.task_id = t.id AND l.last_heartbeat > ?1
                 )
                 ORDER BY t.id",
            )?;

            let tasks = stmt
                .query_map(params![lock_cutoff], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(tasks)
        })
    }

    /// Selected tasks untouched since `lock_cutoff` with no live lock (their
    /// worker stopped between selection and locking).
    pub fn stranded_selected_tasks(&self, lock_cutoff: i64) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.* FROM tasks t
                 WHERE t.status = 'selected'
                 AND t.updated_at <= ?1
                 AND NOT EXISTS (
                     SELECT 1 FROM repo_locks l
                     WHERE l.task_id = t.id AND l.last_heartbeat > ?1
                 )
                 ORDER BY t.id",
            )?;

            let tasks = stmt
                .query_map(params![lock_cutoff], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(tasks)
        })
    }

    /// Tasks some live worker is still handling: running under a live lock,
    /// or selected recently enough that locking may still follow.
    pub fn in_flight_count(&self, lock_cutoff: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM tasks t
                 WHERE (t.status = 'selected' AND t.updated_at > ?1)
                 OR (t.status = 'running' AND EXISTS (
                     SELECT 1 FROM repo_locks l
                     WHERE l.task_id = t.id AND l.last_heartbeat > ?1
                 ))",
                params![lock_cutoff],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Fail a running task and record why, in one transaction.
    ///
    /// Returns false (and records nothing) when the task is no longer running.
    pub fn fail_running_task(
        &self,
        task_id: TaskId,
        worker_id: Option<&str>,
        code: ErrorCode,
        detail: &str,
        reason: &str,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let changed = cas_status_internal(
                &tx,
                task_id,
                TaskStatus::Running,
                TaskStatus::Failed,
                worker_id,
                Some(reason),
            )?;
            if changed {
                tx.execute(
                    "UPDATE tasks SET error_kind = ?1, error_detail = ?2 WHERE id = ?3",
                    params![code.as_str(), detail, task_id],
                )?;
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Waiting tasks whose dependency failed or was cancelled.
    ///
    /// These stay `waiting_dependency` until an operator cancels them.
    pub fn unsatisfiable_dependents(&self) -> Result<Vec<(Task, TaskStatus)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.*, dep.status AS dep_status FROM tasks t
                 INNER JOIN tasks dep ON dep.id = t.depends_on_task_id
                 WHERE t.status = 'waiting_dependency'
                 AND dep.status IN ('failed', 'cancelled')
                 ORDER BY t.id",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    let task = parse_task_row(row)?;
                    let dep_status: String = row.get("dep_status")?;
                    Ok((task, parse_status_column(dep_status)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}
