//! Batch writing and the write-then-commit ordering.
//!
//! Rows are first staged to a JSONEachRow temp file, one object per line,
//! so memory stays flat however large the window is. The file is then
//! streamed to the sink, and only once the sink has accepted it is the job
//! state committed. A crash or failure anywhere before the commit leaves the
//! old progress in place, and the next run re-sends the same rows, which the
//! deduplicating table absorbs.

use crate::error::{Error, Result};
use crate::model::{JobState, Row, Window};
use crate::sink::RowSink;
use crate::state::{JobLock, RunCompletion, RunGuard};
use crate::transform::{RowStream, TransformStats};
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{info, warn};

pub const STAGING_PREFIX: &str = "etl_processed_";
pub const STAGING_SUFFIX: &str = ".jsonl";

#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub dir: PathBuf,
    /// Staged size above which a warning is logged.
    pub warn_bytes: u64,
}

/// Rows written to a staging file. The file is removed on drop.
#[derive(Debug)]
pub struct StagedBatch {
    file: NamedTempFile,
    rows: u64,
    bytes: u64,
}

impl StagedBatch {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Drains `rows` into a new staging file.
///
/// The first row error aborts staging; the partial file is removed.
pub fn stage_rows<I>(rows: I, config: &StagingConfig) -> Result<StagedBatch>
where
    I: Iterator<Item = Result<Row>>,
{
    let file = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(&config.dir)?;
    let mut out = BufWriter::new(file.as_file());

    let mut count = 0u64;
    let mut bytes = 0u64;
    let mut warned = false;
    for row in rows {
        let mut line = serde_json::to_vec(&row?)?;
        line.push(b'\n');
        out.write_all(&line)?;
        count += 1;
        bytes += line.len() as u64;

        if !warned && bytes > config.warn_bytes {
            warned = true;
            warn!(
                staged_bytes = bytes,
                threshold = config.warn_bytes,
                path = %file.path().display(),
                "Staged batch exceeds size warning threshold"
            );
        }
    }
    out.flush()?;
    drop(out);

    Ok(StagedBatch {
        file,
        rows: count,
        bytes,
    })
}

/// Outcome of writing one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub series: u64,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub staged_bytes: u64,
}

pub struct BatchWriter {
    sink: Arc<dyn RowSink>,
    staging: StagingConfig,
}

impl BatchWriter {
    pub fn new(sink: Arc<dyn RowSink>, staging: StagingConfig) -> Self {
        Self { sink, staging }
    }

    /// Transforms and writes every row of `rows`. An empty window skips the
    /// sink entirely.
    pub async fn write<R>(&self, rows: RowStream<R>) -> Result<BatchReport>
    where
        R: BufRead + Send + 'static,
    {
        let staging = self.staging.clone();
        let (batch, stats) = tokio::task::spawn_blocking(move || {
            let mut rows = rows;
            let batch = stage_rows(rows.by_ref(), &staging)?;
            Ok::<_, Error>((batch, rows.into_stats()))
        })
        .await
        .map_err(|e| Error::Internal(format!("staging task failed: {}", e)))??;

        report_transform(&stats);

        if batch.is_empty() {
            info!("No rows to insert, skipping sink write");
        } else {
            self.sink.insert(&batch).await?;
        }

        Ok(BatchReport {
            series: stats.series,
            rows_written: batch.rows(),
            rows_skipped: stats.skipped,
            staged_bytes: batch.bytes(),
        })
    }

    /// Writes the window's rows, then commits the job state. The commit is
    /// never attempted unless the write succeeded.
    pub async fn write_and_commit<R>(
        &self,
        rows: RowStream<R>,
        lock: &JobLock,
        guard: &RunGuard,
        window: Window,
    ) -> Result<(BatchReport, JobState)>
    where
        R: BufRead + Send + 'static,
    {
        let report = self.write(rows).await?;
        let state = lock
            .complete_run(
                guard,
                RunCompletion {
                    window,
                    rows_written: report.rows_written,
                    rows_skipped: report.rows_skipped,
                },
            )
            .await?;
        Ok((report, state))
    }
}

fn report_transform(stats: &TransformStats) {
    if stats.series == 0 {
        warn!("Window returned no series");
    }
    if stats.skipped > 0 {
        warn!(
            skipped = stats.skipped,
            "Skipped unreadable samples; enable debug logging for details"
        );
    }
    info!(
        series = stats.series,
        rows = stats.rows,
        skipped = stats.skipped,
        "Transformed response"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleValue;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn row(ts: i64, value: &str) -> Row {
        Row {
            timestamp: ts,
            metric_name: "up".to_string(),
            labels: [("job".to_string(), "node".to_string())].into_iter().collect(),
            value: SampleValue::parse(value).unwrap(),
        }
    }

    fn staging(dir: &TempDir, warn_bytes: u64) -> StagingConfig {
        StagingConfig {
            dir: dir.path().to_path_buf(),
            warn_bytes,
        }
    }

    #[test]
    fn test_stage_rows_writes_one_line_per_row() {
        let dir = TempDir::new().unwrap();
        let rows = vec![Ok(row(1, "1")), Ok(row(2, "2.5"))];
        let batch = stage_rows(rows.into_iter(), &staging(&dir, 1)).unwrap();

        assert_eq!(batch.rows(), 2);
        let contents = std::fs::read_to_string(batch.path()).unwrap();
        assert_eq!(contents.len() as u64, batch.bytes());
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines[1],
            r#"{"timestamp":2,"metric_name":"up","labels":"{\"job\":\"node\"}","value":2.5}"#
        );
        let name = batch.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX));
    }

    #[test]
    fn test_staging_file_removed_on_error_and_drop() {
        let dir = TempDir::new().unwrap();
        let rows = vec![Ok(row(1, "1")), Err(Error::InvalidResponse("truncated".into()))];
        assert!(stage_rows(rows.into_iter(), &staging(&dir, 1024)).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let batch = stage_rows(vec![Ok(row(1, "1"))].into_iter(), &staging(&dir, 1024)).unwrap();
        let path = batch.path().to_path_buf();
        assert!(path.exists());
        drop(batch);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_empty_window_skips_sink() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(crate::sink::MemorySink::new());
        let writer = BatchWriter::new(sink.clone(), staging(&dir, 1024));

        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        let report = writer
            .write(RowStream::new(Cursor::new(body.as_bytes().to_vec())))
            .await
            .unwrap();

        assert_eq!(report.rows_written, 0);
        assert_eq!(sink.insert_calls(), 0);
    }
}
