//! One export cycle: check the lock, plan, fetch, transform, write, commit.

use crate::clickhouse::ClickHouseClient;
use crate::clock::{format_timestamp, Clock, SystemClock};
use crate::config::{Settings, StateBackendKind};
use crate::error::{Error, FailureKind, Result};
use crate::model::{JobState, Window};
use crate::planner::{Plan, WindowPlanner};
use crate::sink::{ClickHouseSink, RowSink};
use crate::source::{MetricsSource, PrometheusSource};
use crate::state::{ClickHouseStateStore, JobLock, PushGatewayStateStore, RunGuard, StateStore};
use crate::transform::RowStream;
use crate::writer::{BatchReport, BatchWriter, StagingConfig};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Log target of the per-run summary record.
pub const SUMMARY_TARGET: &str = "promhouse::summary";

pub const SPOOL_PREFIX: &str = "prometheus_raw_";
pub const SPOOL_SUFFIX: &str = ".json";

/// How a run ended without failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed {
        window: Window,
        report: BatchReport,
        state: JobState,
    },
    /// The next window is not complete yet.
    NothingToDo { pending: Window },
    /// Another run holds the job.
    AlreadyRunning { started_at: i64 },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { .. } | RunOutcome::NothingToDo { .. } => 0,
            RunOutcome::AlreadyRunning { .. } => FailureKind::AlreadyRunning.exit_code(),
        }
    }
}

/// A failed run, with the window it was working on when known.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct JobFailure {
    pub window: Option<Window>,
    #[source]
    pub error: Error,
}

impl JobFailure {
    fn new(window: Option<Window>, error: Error) -> Self {
        Self { window, error }
    }

    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

pub type RunResult = std::result::Result<RunOutcome, JobFailure>;

/// The one record every run leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: &'static str,
    pub window: Option<Window>,
    pub series: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn from_result(result: &RunResult) -> Self {
        let empty = Self {
            outcome: "",
            window: None,
            series: 0,
            rows_written: 0,
            rows_skipped: 0,
            error: None,
        };
        match result {
            Ok(RunOutcome::Completed { window, report, .. }) => Self {
                outcome: "completed",
                window: Some(*window),
                series: report.series,
                rows_written: report.rows_written,
                rows_skipped: report.rows_skipped,
                ..empty
            },
            Ok(RunOutcome::NothingToDo { pending }) => Self {
                outcome: "nothing_to_do",
                window: Some(*pending),
                ..empty
            },
            Ok(RunOutcome::AlreadyRunning { .. }) => Self {
                outcome: FailureKind::AlreadyRunning.as_str(),
                ..empty
            },
            Err(failure) => Self {
                outcome: failure.kind().as_str(),
                window: failure.window,
                error: Some(failure.error.to_string()),
                ..empty
            },
        }
    }

    pub fn log(&self) {
        let start = self.window.map(|w| w.start);
        let end = self.window.map(|w| w.end);
        match (&self.error, self.outcome) {
            (Some(message), _) => error!(
                target: SUMMARY_TARGET,
                outcome = self.outcome,
                window_start = ?start,
                window_end = ?end,
                rows_written = self.rows_written,
                rows_skipped = self.rows_skipped,
                error = %message,
                "Run failed"
            ),
            (None, "already_running") => warn!(
                target: SUMMARY_TARGET,
                outcome = self.outcome,
                rows_written = self.rows_written,
                rows_skipped = self.rows_skipped,
                "Run skipped"
            ),
            (None, _) => info!(
                target: SUMMARY_TARGET,
                outcome = self.outcome,
                window_start = ?start,
                window_end = ?end,
                series = self.series,
                rows_written = self.rows_written,
                rows_skipped = self.rows_skipped,
                "Run finished"
            ),
        }
    }
}

pub struct EtlJob {
    source: Arc<dyn MetricsSource>,
    lock: JobLock,
    planner: WindowPlanner,
    writer: BatchWriter,
    clock: Arc<dyn Clock>,
    spool_dir: PathBuf,
}

impl EtlJob {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn RowSink>,
        clock: Arc<dyn Clock>,
        planner: WindowPlanner,
        staging: StagingConfig,
    ) -> Self {
        let spool_dir = staging.dir.clone();
        Self {
            source,
            lock: JobLock::new(store, clock.clone()),
            planner,
            writer: BatchWriter::new(sink, staging),
            clock,
            spool_dir,
        }
    }

    /// Wires the production collaborators described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let clickhouse = ClickHouseClient::new(&settings.clickhouse)?;
        let store = build_state_store(settings, &clickhouse)?;
        let sink = Arc::new(ClickHouseSink::new(clickhouse, settings.clickhouse.table.clone()));
        let source = Arc::new(PrometheusSource::new(&settings.prometheus)?);
        let planner = WindowPlanner::new(settings.etl.window_policy()?, settings.etl.min_start()?);
        let staging = StagingConfig {
            dir: settings.etl.temp_dir(),
            warn_bytes: settings.etl.staging_warn_bytes,
        };
        Ok(Self::new(source, store, sink, Arc::new(SystemClock), planner, staging))
    }

    pub fn lock(&self) -> &JobLock {
        &self.lock
    }

    /// Runs one cycle. Never panics on remote failures; every fatal
    /// condition comes back as a [`JobFailure`].
    pub async fn run(&self) -> RunResult {
        let state = self
            .lock
            .current()
            .await
            .map_err(|e| JobFailure::new(None, e))?;
        if state.is_running() {
            let started_at = state.timestamp_start.unwrap_or_default();
            warn!(
                started_at = %format_timestamp(started_at),
                "Previous run has not completed; skipping. Reseed the state if it crashed"
            );
            return Ok(RunOutcome::AlreadyRunning { started_at });
        }

        let now = self.clock.now();
        let first_run = !state.has_completed_batch();
        let plan = self
            .planner
            .plan(state.timestamp_progress, first_run, now)
            .map_err(|e| JobFailure::new(None, e))?;
        let window = match plan {
            Plan::Run(window) => window,
            Plan::NothingToDo { pending } => {
                info!(
                    window_end = %format_timestamp(pending.end),
                    now = %format_timestamp(now),
                    "Next window is not complete yet"
                );
                return Ok(RunOutcome::NothingToDo { pending });
            }
        };

        let guard = match self.lock.start_run().await {
            Ok(guard) => guard,
            Err(Error::AlreadyRunning { started_at }) => {
                return Ok(RunOutcome::AlreadyRunning { started_at })
            }
            Err(e) => return Err(JobFailure::new(Some(window), e)),
        };

        info!(
            window_start = %format_timestamp(window.start),
            window_end = %format_timestamp(window.end),
            window_seconds = self.planner.policy().window_seconds,
            overlap_seconds = self.planner.policy().overlap_seconds,
            first_run,
            "Processing window"
        );

        match self.process(&guard, window).await {
            Ok((report, state)) => Ok(RunOutcome::Completed {
                window,
                report,
                state,
            }),
            Err(e) => {
                error!(
                    error = %e,
                    started_at = %format_timestamp(guard.started_at()),
                    "Run failed; the job stays marked running until reseeded"
                );
                Err(JobFailure::new(Some(window), e))
            }
        }
    }

    async fn process(&self, guard: &RunGuard, window: Window) -> Result<(BatchReport, JobState)> {
        let spool = tempfile::Builder::new()
            .prefix(SPOOL_PREFIX)
            .suffix(SPOOL_SUFFIX)
            .tempfile_in(&self.spool_dir)?;

        let mut out = tokio::fs::File::from_std(spool.reopen()?);
        let bytes = self.source.fetch_range(window, &mut out).await?;
        drop(out);
        info!(
            source = %self.source.describe(),
            bytes,
            path = %spool.path().display(),
            "Fetched range response"
        );

        let rows = RowStream::new(BufReader::new(spool.reopen()?));
        self.writer
            .write_and_commit(rows, &self.lock, guard, window)
            .await
    }
}

/// Builds the state backend selected by `etl.state_backend`.
pub fn build_state_store(settings: &Settings, clickhouse: &ClickHouseClient) -> Result<Arc<dyn StateStore>> {
    match settings.etl.state_backend {
        StateBackendKind::Clickhouse => Ok(Arc::new(ClickHouseStateStore::new(
            clickhouse.clone(),
            settings.clickhouse.state_table.clone(),
        ))),
        StateBackendKind::Pushgateway => {
            let gateway = settings.pushgateway.as_ref().ok_or_else(|| {
                Error::Config("etl.state_backend = \"pushgateway\" requires a [pushgateway] section".into())
            })?;
            Ok(Arc::new(PushGatewayStateStore::new(gateway)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_for_failure_keeps_window() {
        let window = Window { start: 10, end: 310 };
        let result: RunResult = Err(JobFailure::new(
            Some(window),
            Error::Transport("connection refused".into()),
        ));
        let summary = RunSummary::from_result(&result);
        assert_eq!(summary.outcome, "transport");
        assert_eq!(summary.window, Some(window));
        assert!(summary.error.unwrap().contains("connection refused"));
        assert_eq!(result.unwrap_err().exit_code(), 4);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::NothingToDo { pending: Window { start: 0, end: 1 } }.exit_code(), 0);
        assert_eq!(RunOutcome::AlreadyRunning { started_at: 5 }.exit_code(), 3);
    }
}
