//! Repository lease operations.
//!
//! A lease is live while `now - last_heartbeat < ttl`. Stale leases are taken
//! over on acquire and removed by `reclaim_stale_locks`.

use super::{Database, now_ms};
use crate::types::{LockGrant, RepoLock, TaskId};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

fn parse_lock_row(row: &Row) -> rusqlite::Result<RepoLock> {
    Ok(RepoLock {
        repo_path: row.get("repo_path")?,
        worker_id: row.get("worker_id")?,
        task_id: row.get("task_id")?,
        acquired_at: row.get("acquired_at")?,
        last_heartbeat: row.get("last_heartbeat")?,
    })
}

fn get_lock_internal(conn: &Connection, repo_path: &str) -> Result<Option<RepoLock>> {
    let lock = conn
        .query_row(
            "SELECT * FROM repo_locks WHERE repo_path = ?1",
            params![repo_path],
            parse_lock_row,
        )
        .optional()?;
    Ok(lock)
}

impl Database {
    /// Try to take the lease on `repo_path` for `worker_id`.
    ///
    /// Denied while another worker holds a live lease. A stale lease is
    /// replaced. Re-acquiring a lease the worker already holds refreshes it.
    pub fn acquire_lock(
        &self,
        repo_path: &str,
        worker_id: &str,
        task_id: Option<TaskId>,
        ttl_ms: i64,
    ) -> Result<LockGrant> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_ms();

            if let Some(existing) = get_lock_internal(&tx, repo_path)? {
                if existing.worker_id != worker_id && existing.is_live(now, ttl_ms) {
                    return Ok(LockGrant::Denied {
                        holder: existing.worker_id,
                    });
                }
                if existing.worker_id != worker_id {
                    tracing::warn!(
                        repo_path,
                        stale_holder = %existing.worker_id,
                        new_holder = worker_id,
                        "Taking over stale repository lock"
                    );
                }
            }

            tx.execute(
                "INSERT INTO repo_locks (repo_path, worker_id, task_id, acquired_at, last_heartbeat)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(repo_path) DO UPDATE SET
                    worker_id = excluded.worker_id,
                    task_id = excluded.task_id,
                    acquired_at = excluded.acquired_at,
                    last_heartbeat = excluded.last_heartbeat",
                params![repo_path, worker_id, task_id, now],
            )?;

            tx.commit()?;
            Ok(LockGrant::Granted)
        })
    }

    /// Refresh the heartbeat. Returns false if `worker_id` no longer holds the lease.
    pub fn heartbeat_lock(&self, repo_path: &str, worker_id: &str) -> Result<bool> {
        let now = now_ms();
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE repo_locks SET last_heartbeat = ?1
                 WHERE repo_path = ?2 AND worker_id = ?3",
                params![now, repo_path, worker_id],
            )?;
            Ok(updated > 0)
        })
    }

    /// Release the lease. Only the holder can release.
    pub fn release_lock(&self, repo_path: &str, worker_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM repo_locks WHERE repo_path = ?1 AND worker_id = ?2",
                params![repo_path, worker_id],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Delete every lease whose heartbeat is older than the TTL.
    /// Returns the removed leases.
    pub fn reclaim_stale_locks(&self, ttl_ms: i64) -> Result<Vec<RepoLock>> {
        let cutoff = now_ms() - ttl_ms;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let stale = {
                let mut stmt = tx.prepare(
                    "SELECT * FROM repo_locks WHERE last_heartbeat <= ?1 ORDER BY repo_path",
                )?;
                stmt.query_map(params![cutoff], parse_lock_row)?
                    .collect::<Result<Vec<_>, _>>()?
            };

            tx.execute(
                "DELETE FROM repo_locks WHERE last_heartbeat <= ?1",
                params![cutoff],
            )?;
            tx.commit()?;

            Ok(stale)
        })
    }

    /// Get the lease on a repository, live or stale.
    pub fn get_lock(&self, repo_path: &str) -> Result<Option<RepoLock>> {
        self.with_conn(|conn| get_lock_internal(conn, repo_path))
    }

    /// Get every lease, ordered by repository.
    pub fn get_all_locks(&self) -> Result<Vec<RepoLock>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM repo_locks ORDER BY repo_path")?;
            let locks = stmt
                .query_map([], parse_lock_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(locks)
        })
    }
}
