//! Status transition audit trail.

use crate::db::{Database, now_ms};
use crate::types::{TaskId, TaskSequenceEvent, TaskStatus};
use anyhow::Result;
use rusqlite::{Connection, params};

/// Record a status transition.
///
/// Uses snapshot pattern: closes the open row for the task (if any) and
/// inserts a new one carrying only the new status.
pub(crate) fn record_state_transition(
    conn: &Connection,
    task_id: TaskId,
    status: TaskStatus,
    worker_id: Option<&str>,
    reason: Option<&str>,
) -> Result<()> {
    let now = now_ms();

    conn.execute(
        "UPDATE task_sequence SET end_timestamp = ?1
         WHERE task_id = ?2 AND end_timestamp IS NULL",
        params![now, task_id],
    )?;

    conn.execute(
        "INSERT INTO task_sequence (task_id, worker_id, status, reason, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![task_id, worker_id, status.as_str(), reason, now],
    )?;

    Ok(())
}

impl Database {
    /// Get the status history for a task, oldest first.
    pub fn get_task_history(&self, task_id: TaskId) -> Result<Vec<TaskSequenceEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, worker_id, status, reason, timestamp, end_timestamp
                 FROM task_sequence
                 WHERE task_id = ?1
                 ORDER BY id ASC",
            )?;

            let events = stmt
                .query_map(params![task_id], |row| {
                    Ok(TaskSequenceEvent {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        worker_id: row.get(2)?,
                        status: row.get(3)?,
                        reason: row.get(4)?,
                        timestamp: row.get(5)?,
                        end_timestamp: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(events)
        })
    }
}
