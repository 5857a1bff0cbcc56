//! Next-task selection.
//!
//! Candidates are ordered by priority (highest first), then creation time,
//! then id. Ownership is taken with a `queued -> selected` compare-and-swap,
//! so concurrent schedulers never hand out the same task twice.

use crate::db::{Database, now_ms};
use crate::types::{Task, TaskStatus};
use anyhow::Result;
use tracing::debug;

/// Result of one selection attempt.
#[derive(Debug)]
pub enum Selection {
    /// The task is now `selected` by the calling worker.
    Task(Box<Task>),
    /// No queued or waiting tasks at all.
    Empty,
    /// Pending tasks exist but none is eligible right now.
    Blocked,
}

#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    lock_ttl_ms: i64,
    max_cas_retries: u32,
}

impl Scheduler {
    pub fn new(db: Database, lock_ttl_ms: i64, max_cas_retries: u32) -> Self {
        Self {
            db,
            lock_ttl_ms,
            max_cas_retries,
        }
    }

    /// Select and claim the best eligible task for `worker_id`.
    pub fn select_next(&self, worker_id: &str) -> Result<Selection> {
        for attempt in 0..=self.max_cas_retries {
            let cutoff = now_ms() - self.lock_ttl_ms;
            let Some(candidate) = self.db.eligible_candidates(cutoff, 1)?.into_iter().next()
            else {
                let counts = self.db.queue_counts()?;
                return Ok(if counts.pending() == 0 {
                    Selection::Empty
                } else {
                    Selection::Blocked
                });
            };

            if self.db.compare_and_set_status(
                candidate.id,
                TaskStatus::Queued,
                TaskStatus::Selected,
                Some(worker_id),
                Some("selected"),
            )? {
                let task = self.db.require_task(candidate.id)?;
                return Ok(Selection::Task(Box::new(task)));
            }

            debug!(
                worker = worker_id,
                task_id = candidate.id,
                attempt,
                "Lost selection race, retrying"
            );
        }

        Ok(Selection::Blocked)
    }

    /// Hand a selected task back to the queue (e.g. its repository is locked).
    pub fn release_to_queue(&self, task: &Task, worker_id: &str, reason: &str) -> Result<bool> {
        self.db.compare_and_set_status(
            task.id,
            TaskStatus::Selected,
            TaskStatus::Queued,
            Some(worker_id),
            Some(reason),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewTask;

    fn setup() -> (Database, Scheduler) {
        let db = Database::open_in_memory().unwrap();
        let scheduler = Scheduler::new(db.clone(), 60_000, 3);
        (db, scheduler)
    }

    fn selected_id(selection: Selection) -> i64 {
        match selection {
            Selection::Task(task) => task.id,
            other => panic!("expected a task, got {:?}", other),
        }
    }

    #[test]
    fn empty_queue_reports_empty() {
        let (_db, scheduler) = setup();
        assert!(matches!(scheduler.select_next("w1").unwrap(), Selection::Empty));
    }

    #[test]
    fn waiting_dependents_report_blocked() {
        let (db, scheduler) = setup();
        let parent = db.create_task(NewTask::new("p", "/a", "r")).unwrap();
        db.create_task(NewTask::new("c", "/b", "r").depends_on(parent.id))
            .unwrap();

        assert_eq!(selected_id(scheduler.select_next("w1").unwrap()), parent.id);
        assert!(matches!(scheduler.select_next("w1").unwrap(), Selection::Blocked));
    }

    #[test]
    fn locked_repository_is_skipped() {
        let (db, scheduler) = setup();
        let high = db
            .create_task(NewTask::new("high", "/locked", "r").with_priority(9))
            .unwrap();
        let low = db.create_task(NewTask::new("low", "/free", "r")).unwrap();
        db.acquire_lock("/locked", "other", None, 60_000).unwrap();

        assert_eq!(selected_id(scheduler.select_next("w1").unwrap()), low.id);
        assert!(matches!(scheduler.select_next("w1").unwrap(), Selection::Blocked));

        db.release_lock("/locked", "other").unwrap();
        assert_eq!(selected_id(scheduler.select_next("w1").unwrap()), high.id);
    }

    #[test]
    fn release_to_queue_makes_task_selectable_again() {
        let (db, scheduler) = setup();
        let task = db.create_task(NewTask::new("t", "/a", "r")).unwrap();

        let Selection::Task(selected) = scheduler.select_next("w1").unwrap() else {
            panic!("expected a task");
        };
        assert_eq!(selected.worker_id.as_deref(), Some("w1"));
        assert!(scheduler.release_to_queue(&selected, "w1", "lock denied").unwrap());

        let again = db.require_task(task.id).unwrap();
        assert_eq!(again.status, TaskStatus::Queued);
        assert!(again.worker_id.is_none());
        assert_eq!(selected_id(scheduler.select_next("w2").unwrap()), task.id);
        assert_eq!(db.require_task(task.id).unwrap().attempt_count, 2);
    }
}
