//! Common test utilities: an export job wired to in-memory collaborators.

use promhouse_core::clock::ManualClock;
use promhouse_core::model::JobState;
use promhouse_core::planner::{MinStart, WindowPlanner, WindowPolicy};
use promhouse_core::sink::MemorySink;
use promhouse_core::source::StaticSource;
use promhouse_core::state::MemoryStateStore;
use promhouse_core::writer::StagingConfig;
use promhouse_core::EtlJob;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestJob {
    pub job: EtlJob,
    pub source: Arc<StaticSource>,
    pub store: Arc<MemoryStateStore>,
    pub sink: Arc<MemorySink>,
    pub clock: Arc<ManualClock>,
    pub staging_dir: TempDir,
}

pub struct TestJobBuilder {
    state: Option<JobState>,
    body: String,
    now: i64,
    window_seconds: i64,
    overlap_seconds: i64,
    min_start: Option<MinStart>,
}

impl TestJobBuilder {
    pub fn new() -> Self {
        Self {
            state: None,
            body: matrix("[]"),
            now: 1700000400,
            window_seconds: 300,
            overlap_seconds: 30,
            min_start: None,
        }
    }

    pub fn state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    pub fn window(mut self, window_seconds: i64, overlap_seconds: i64) -> Self {
        self.window_seconds = window_seconds;
        self.overlap_seconds = overlap_seconds;
        self
    }

    pub fn min_start(mut self, min_start: MinStart) -> Self {
        self.min_start = Some(min_start);
        self
    }

    pub fn build(self) -> TestJob {
        let source = Arc::new(StaticSource::new(self.body));
        let store = Arc::new(MemoryStateStore::new(self.state));
        let sink = Arc::new(MemorySink::new());
        let clock = Arc::new(ManualClock::new(self.now));
        let staging_dir = TempDir::new().expect("create staging dir");

        let policy = WindowPolicy::new(self.window_seconds, self.overlap_seconds).expect("valid policy");
        let job = EtlJob::new(
            source.clone(),
            store.clone(),
            sink.clone(),
            clock.clone(),
            WindowPlanner::new(policy, self.min_start),
            StagingConfig {
                dir: staging_dir.path().to_path_buf(),
                warn_bytes: 1024 * 1024,
            },
        );

        TestJob {
            job,
            source,
            store,
            sink,
            clock,
            staging_dir,
        }
    }
}

impl TestJob {
    /// Files left behind in the staging directory.
    pub fn leftover_files(&self) -> usize {
        std::fs::read_dir(self.staging_dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Wraps a `result` array in a successful matrix response.
pub fn matrix(result: &str) -> String {
    format!(
        r#"{{"status":"success","data":{{"resultType":"matrix","result":{}}}}}"#,
        result
    )
}

/// One series as it appears in a matrix result.
pub fn series(name: &str, labels: &[(&str, &str)], samples: &[(i64, &str)]) -> String {
    let mut metric = serde_json::Map::new();
    metric.insert("__name__".to_string(), name.into());
    for (key, value) in labels {
        metric.insert(key.to_string(), (*value).into());
    }
    let values: Vec<serde_json::Value> = samples
        .iter()
        .map(|(ts, v)| serde_json::json!([ts, v]))
        .collect();
    serde_json::json!({"metric": metric, "values": values}).to_string()
}

/// The fixture used by most scenarios: 3 series with 2 samples each.
pub fn three_series() -> String {
    let result = [
        series("up", &[("job", "node"), ("instance", "a")], &[(1700000000, "1"), (1700000015, "1")]),
        series("up", &[("job", "node"), ("instance", "b")], &[(1700000000, "0"), (1700000015, "1")]),
        series("load1", &[("instance", "a")], &[(1700000000, "0.25"), (1700000015, "1e-3")]),
    ];
    matrix(&format!("[{}]", result.join(",")))
}
