//! In-process sink that behaves like a deduplicating table.

use super::RowSink;
use crate::error::{Error, Result};
use crate::writer::StagedBatch;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Key the sample table deduplicates on.
pub type SampleKey = (i64, String, String);

#[derive(Deserialize)]
struct StagedRow {
    timestamp: i64,
    metric_name: String,
    labels: String,
    value: f64,
}

/// Keeps the last value per `(timestamp, metric_name, labels)`, the way a
/// replacing merge tree reads after deduplication.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<SampleKey, f64>>,
    inserts: AtomicUsize,
    fail: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rows(&self) -> BTreeMap<SampleKey, f64> {
        self.rows.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    /// Number of successful insert calls.
    pub fn insert_calls(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn insert(&self, batch: &StagedBatch) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("sink unavailable".to_string()));
        }

        let contents = tokio::fs::read_to_string(batch.path()).await?;
        let mut parsed = Vec::with_capacity(batch.rows() as usize);
        for line in contents.lines().filter(|l| !l.is_empty()) {
            let row: StagedRow = serde_json::from_str(line)?;
            parsed.push(row);
        }

        let mut rows = self.rows.lock().await;
        for row in parsed {
            rows.insert((row.timestamp, row.metric_name, row.labels), row.value);
        }
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
