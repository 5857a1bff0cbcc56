//! Per-repository lease management.
//!
//! Leases live in the store so that workers in separate processes exclude
//! each other. A held lease is kept alive by a background heartbeat task.

use crate::db::{Database, now_ms};
use crate::types::{LockGrant, RepoLock, TaskId};
use anyhow::Result;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct LockManager {
    db: Database,
    ttl_ms: i64,
    heartbeat_interval: Duration,
}

impl LockManager {
    pub fn new(db: Database, ttl: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            db,
            ttl_ms: ttl.as_millis() as i64,
            heartbeat_interval,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    pub fn acquire(
        &self,
        repo_path: &str,
        worker_id: &str,
        task_id: Option<TaskId>,
    ) -> Result<LockGrant> {
        let grant = self
            .db
            .acquire_lock(repo_path, worker_id, task_id, self.ttl_ms)?;
        match grant {
            LockGrant::Granted => debug!(repo = repo_path, worker = worker_id, "Lock acquired"),
            LockGrant::Denied { ref holder } => {
                debug!(repo = repo_path, worker = worker_id, %holder, "Lock denied")
            }
        }
        Ok(grant)
    }

    pub fn heartbeat(&self, repo_path: &str, worker_id: &str) -> Result<bool> {
        self.db.heartbeat_lock(repo_path, worker_id)
    }

    pub fn release(&self, repo_path: &str, worker_id: &str) -> Result<bool> {
        let released = self.db.release_lock(repo_path, worker_id)?;
        if !released {
            warn!(
                repo = repo_path,
                worker = worker_id,
                "Lock was no longer held at release"
            );
        }
        Ok(released)
    }

    /// Free every stale lease. Tasks they guarded are left untouched.
    pub fn reclaim_stale(&self) -> Result<Vec<RepoLock>> {
        let reclaimed = self.db.reclaim_stale_locks(self.ttl_ms)?;
        for lock in &reclaimed {
            info!(
                repo = %lock.repo_path,
                holder = %lock.worker_id,
                task_id = ?lock.task_id,
                "Reclaimed stale lock"
            );
        }
        Ok(reclaimed)
    }

    /// All leases paired with their liveness.
    pub fn list(&self) -> Result<Vec<(RepoLock, bool)>> {
        let now = now_ms();
        Ok(self
            .db
            .get_all_locks()?
            .into_iter()
            .map(|lock| {
                let live = lock.is_live(now, self.ttl_ms);
                (lock, live)
            })
            .collect())
    }

    /// Keep the lease alive until the returned guard is dropped.
    pub fn start_heartbeat(&self, repo_path: &str, worker_id: &str) -> HeartbeatGuard {
        let db = self.db.clone();
        let repo_path = repo_path.to_string();
        let worker_id = worker_id.to_string();
        let period = self.heartbeat_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                match db.heartbeat_lock(&repo_path, &worker_id) {
                    Ok(true) => debug!(repo = %repo_path, worker = %worker_id, "Heartbeat"),
                    Ok(false) => {
                        warn!(repo = %repo_path, worker = %worker_id, "Lost repository lock");
                        break;
                    }
                    Err(e) => warn!(repo = %repo_path, worker = %worker_id, "Heartbeat failed: {}", e),
                }
            }
        });

        HeartbeatGuard { handle }
    }
}

/// Stops the heartbeat task when dropped.
pub struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(ttl: Duration, beat: Duration) -> (Database, LockManager) {
        let db = Database::open_in_memory().unwrap();
        let locks = LockManager::new(db.clone(), ttl, beat);
        (db, locks)
    }

    #[test]
    fn list_reports_liveness() {
        let (_db, locks) = manager(Duration::from_secs(60), Duration::from_secs(1));
        locks.acquire("/a", "w1", Some(1)).unwrap();

        let listed = locks.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].1);
    }

    #[tokio::test]
    async fn heartbeat_keeps_lease_fresh() {
        let (db, locks) = manager(Duration::from_secs(60), Duration::from_millis(20));
        locks.acquire("/a", "w1", None).unwrap();
        let before = db.get_lock("/a").unwrap().unwrap().last_heartbeat;

        let guard = locks.start_heartbeat("/a", "w1");
        tokio::time::sleep(Duration::from_millis(120)).await;
        drop(guard);

        let after = db.get_lock("/a").unwrap().unwrap().last_heartbeat;
        assert!(after > before);
    }

    #[tokio::test]
    async fn heartbeat_stops_when_lease_is_lost() {
        let (db, locks) = manager(Duration::from_secs(60), Duration::from_millis(10));
        locks.acquire("/a", "w1", None).unwrap();
        let guard = locks.start_heartbeat("/a", "w1");

        db.release_lock("/a", "w1").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(guard.handle.is_finished());
    }
}
