//! Scheduled job driver
//!
//! Job state is persisted per job kind and re-read at every trigger, so
//! enabling or disabling a job takes effect without a restart and last-run
//! auditing works without wall-clock dependence in tests. The persisted
//! `running` flag guards against overlapping runs of the same job kind.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;

use crate::db::Database;
use crate::error::Result;
use crate::types::JobKind;

/// Why a triggered run did not execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCause {
    /// Job is disabled: a disabled job is a no-op, not skipped-and-retried
    Disabled,
    /// A previous run of this job kind is still executing
    AlreadyRunning,
    /// No schedule row exists for this job kind
    NotConfigured,
}

/// Outcome of one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The task failed; the error is recorded on the schedule row and the
    /// job stays enabled (no automatic circuit breaking)
    Failed(String),
    Skipped(SkipCause),
}

/// Drives Idle -> Running -> Idle for each job kind.
pub struct Scheduler {
    db: Arc<Database>,
}

impl Scheduler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Execute one triggered run of a job.
    ///
    /// Checks the persisted enabled flag and claims the run slot before
    /// invoking the task; records the run timestamp and any error on
    /// completion.
    pub async fn run<F, Fut>(&self, job: JobKind, task: F) -> Result<RunOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(config) = self.db.get_schedule(job)? else {
            tracing::warn!(job = job.as_str(), "No schedule configured, skipping");
            return Ok(RunOutcome::Skipped(SkipCause::NotConfigured));
        };

        if !config.enabled {
            tracing::info!(job = job.as_str(), "Job disabled, skipping run");
            return Ok(RunOutcome::Skipped(SkipCause::Disabled));
        }

        if !self.db.try_begin_run(job)? {
            tracing::warn!(job = job.as_str(), "Previous run still executing, skipping");
            return Ok(RunOutcome::Skipped(SkipCause::AlreadyRunning));
        }

        tracing::info!(job = job.as_str(), "Job run started");
        let outcome = match task().await {
            Ok(()) => {
                self.db.finish_run(job, Utc::now(), None)?;
                tracing::info!(job = job.as_str(), "Job run completed");
                RunOutcome::Completed
            }
            Err(e) => {
                let message = e.to_string();
                self.db.finish_run(job, Utc::now(), Some(&message))?;
                tracing::error!(job = job.as_str(), error = %message, "Job run failed");
                RunOutcome::Failed(message)
            }
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn scheduler() -> (Arc<Database>, Scheduler) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        db.ensure_schedule_defaults().unwrap();
        let scheduler = Scheduler::new(db.clone());
        (db, scheduler)
    }

    #[tokio::test]
    async fn test_successful_run_records_timestamp() {
        let (db, scheduler) = scheduler();

        let outcome = scheduler
            .run(JobKind::Collection, || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let config = db.get_schedule(JobKind::Collection).unwrap().unwrap();
        assert!(config.last_run_at.is_some());
        assert!(config.last_error.is_none());
        assert!(!config.running);
    }

    #[tokio::test]
    async fn test_failed_run_stays_enabled() {
        let (db, scheduler) = scheduler();

        let outcome = scheduler
            .run(JobKind::Collection, || async {
                Err(Error::Collection("provider down".to_string()))
            })
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Failed(_)));

        let config = db.get_schedule(JobKind::Collection).unwrap().unwrap();
        assert!(config.enabled);
        assert!(config.last_error.is_some());
        assert!(!config.running);
    }

    #[tokio::test]
    async fn test_disabled_job_is_noop() {
        let (db, scheduler) = scheduler();
        db.set_schedule_enabled(JobKind::Reporting, false).unwrap();

        let outcome = scheduler
            .run(JobKind::Reporting, || async {
                panic!("task must not run for a disabled job")
            })
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipCause::Disabled));
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let (db, scheduler) = scheduler();

        // Simulate a run still in flight
        assert!(db.try_begin_run(JobKind::Collection).unwrap());

        let outcome = scheduler
            .run(JobKind::Collection, || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipCause::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_unconfigured_job_is_skipped() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let scheduler = Scheduler::new(db);

        let outcome = scheduler
            .run(JobKind::Collection, || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipCause::NotConfigured));
    }
}
