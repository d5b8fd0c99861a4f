//! Job state persistence and the run lock built on top of it.
//!
//! A [`StateStore`] holds a single [`JobState`] record per job. [`JobLock`]
//! implements the two-phase protocol over it: a run first marks its start
//! (the record becomes `Running`), and only after its data is durably written
//! does it commit the new progress and mark its end (back to `Idle`).
//!
//! The lock is advisory. Two processes calling [`JobLock::start_run`] at the
//! same instant can both succeed; schedules are expected not to overlap.
//! A run that fails or dies between start and completion leaves the record `Running`
//! until an operator clears it with [`JobLock::seed`].

pub mod clickhouse;
pub mod memory;
pub mod pushgateway;

use crate::clock::{format_timestamp, Clock};
use crate::error::{Error, Result};
use crate::model::{JobState, Window};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub use self::clickhouse::ClickHouseStateStore;
pub use self::memory::MemoryStateStore;
pub use self::pushgateway::PushGatewayStateStore;

/// Backend holding the job record.
///
/// Implementations only move whole records; all state-machine logic lives in
/// [`JobLock`], so backends are interchangeable.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the latest record, or `None` if the job has never been seeded.
    async fn read_state(&self) -> Result<Option<JobState>>;

    /// Replaces the record.
    async fn write_state(&self, state: &JobState) -> Result<()>;

    /// Short human-readable identity for logs.
    fn describe(&self) -> String;
}

/// Proof that this process marked a run as started.
#[derive(Debug, Clone)]
pub struct RunGuard {
    started_at: i64,
    previous: JobState,
}

impl RunGuard {
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    /// The record as it was before the run was marked.
    pub fn previous(&self) -> &JobState {
        &self.previous
    }
}

/// What a finished run reports back to the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCompletion {
    pub window: Window,
    pub rows_written: u64,
    pub rows_skipped: u64,
}

pub struct JobLock {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl JobLock {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Reads the record; a never-seeded job reads as an empty idle record.
    pub async fn current(&self) -> Result<JobState> {
        Ok(self.store.read_state().await?.unwrap_or_default())
    }

    /// Marks a run as started. Fails with [`Error::AlreadyRunning`] if the
    /// record shows a run in flight.
    pub async fn start_run(&self) -> Result<RunGuard> {
        let previous = self.current().await?;
        if previous.is_running() {
            return Err(Error::AlreadyRunning {
                started_at: previous.timestamp_start.unwrap_or_default(),
            });
        }

        let started_at = self.clock.now();
        let marked = JobState {
            timestamp_start: Some(started_at),
            timestamp_end: None,
            ..previous.clone()
        };
        self.store.write_state(&marked).await?;

        info!(
            store = %self.store.describe(),
            started_at = %format_timestamp(started_at),
            "Marked job start"
        );
        Ok(RunGuard {
            started_at,
            previous,
        })
    }

    /// Commits progress and batch metadata, returning the job to idle.
    ///
    /// Must only be called once the window's rows are durably written.
    pub async fn complete_run(&self, guard: &RunGuard, completion: RunCompletion) -> Result<JobState> {
        let progress = completion.window.end;
        if let Some(previous) = guard.previous.timestamp_progress {
            if progress < previous {
                return Err(Error::Internal(format!(
                    "refusing to move progress backward from {} to {}",
                    previous, progress
                )));
            }
        }

        let state = JobState {
            timestamp_progress: Some(progress),
            timestamp_start: Some(guard.started_at),
            timestamp_end: Some(self.end_timestamp(guard)),
            batch_window_seconds: Some(completion.window.len_seconds()),
            batch_rows: Some(completion.rows_written),
            batch_skipped_count: Some(completion.rows_skipped),
        };
        self.store.write_state(&state).await?;

        info!(
            progress = %format_timestamp(progress),
            rows_written = completion.rows_written,
            rows_skipped = completion.rows_skipped,
            "Committed job state"
        );
        Ok(state)
    }

    /// Writes an idle record with the given progress. This is the operator
    /// action for initialising a job and for clearing a stuck run.
    pub async fn seed(&self, progress: i64, force: bool) -> Result<JobState> {
        let current = self.current().await?;
        if current.is_running() && !force {
            return Err(Error::AlreadyRunning {
                started_at: current.timestamp_start.unwrap_or_default(),
            });
        }
        if current.is_running() {
            warn!(
                started_at = ?current.timestamp_start,
                "Overwriting state of a running job"
            );
        }

        let state = JobState::seeded(progress, self.clock.now());
        self.store.write_state(&state).await?;
        info!(
            store = %self.store.describe(),
            progress = %format_timestamp(progress),
            "Seeded job state"
        );
        Ok(state)
    }

    fn end_timestamp(&self, guard: &RunGuard) -> i64 {
        self.clock.now().max(guard.started_at + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn lock_with(state: Option<JobState>) -> (JobLock, Arc<MemoryStateStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStateStore::new(state));
        let clock = Arc::new(ManualClock::new(1700001000));
        let lock = JobLock::new(store.clone(), clock.clone());
        (lock, store, clock)
    }

    #[tokio::test]
    async fn test_start_then_complete() {
        let (lock, store, clock) = lock_with(Some(JobState::seeded(1700000000, 1699999000)));

        let guard = lock.start_run().await.unwrap();
        let marked = store.snapshot().await.unwrap();
        assert!(marked.is_running());
        assert_eq!(marked.timestamp_progress, Some(1700000000));

        clock.advance(20);
        let window = Window {
            start: 1699999970,
            end: 1700000270,
        };
        let state = lock
            .complete_run(
                &guard,
                RunCompletion {
                    window,
                    rows_written: 6,
                    rows_skipped: 1,
                },
            )
            .await
            .unwrap();

        assert!(!state.is_running());
        assert_eq!(state.timestamp_progress, Some(1700000270));
        assert_eq!(state.timestamp_start, Some(1700001000));
        assert_eq!(state.timestamp_end, Some(1700001020));
        assert_eq!(state.batch_window_seconds, Some(300));
        assert_eq!(state.batch_rows, Some(6));
        assert_eq!(state.batch_skipped_count, Some(1));
        assert_eq!(store.writes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_end_is_strictly_after_start() {
        let (lock, _, _) = lock_with(Some(JobState::seeded(100, 50)));
        let guard = lock.start_run().await.unwrap();
        let state = lock
            .complete_run(
                &guard,
                RunCompletion {
                    window: Window { start: 100, end: 400 },
                    rows_written: 0,
                    rows_skipped: 0,
                },
            )
            .await
            .unwrap();
        assert!(state.timestamp_end.unwrap() > state.timestamp_start.unwrap());
    }

    #[tokio::test]
    async fn test_start_refused_while_running() {
        let running = JobState {
            timestamp_progress: Some(1700000000),
            timestamp_start: Some(1700000500),
            ..JobState::default()
        };
        let (lock, store, _) = lock_with(Some(running));
        let err = lock.start_run().await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { started_at: 1700000500 }));
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_progress_never_moves_backward() {
        let (lock, store, _) = lock_with(Some(JobState::seeded(1700000000, 1)));
        let guard = lock.start_run().await.unwrap();
        let err = lock
            .complete_run(
                &guard,
                RunCompletion {
                    window: Window {
                        start: 1699990000,
                        end: 1699990300,
                    },
                    rows_written: 0,
                    rows_skipped: 0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(store.writes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_seed_clears_stuck_run_only_with_force() {
        let stuck = JobState {
            timestamp_progress: Some(1700000000),
            timestamp_start: Some(1700000500),
            ..JobState::default()
        };
        let (lock, store, _) = lock_with(Some(stuck));
        assert!(lock.seed(1700000000, false).await.is_err());

        let state = lock.seed(1700000000, true).await.unwrap();
        assert!(!state.is_running());
        assert!(!state.has_completed_batch());
        assert_eq!(store.snapshot().await, Some(state));
    }

    #[tokio::test]
    async fn test_unseeded_job_reads_as_idle() {
        let (lock, _, _) = lock_with(None);
        let state = lock.current().await.unwrap();
        assert_eq!(state, JobState::default());
        assert!(!state.is_running());
    }
}
