//! Destinations for staged sample batches.

pub mod memory;

use crate::clickhouse::ClickHouseClient;
use crate::error::Result;
use crate::model::ROW_COLUMNS;
use crate::writer::StagedBatch;
use async_trait::async_trait;
use tracing::info;

pub use self::memory::MemorySink;

/// Writes staged rows to the sample table.
///
/// The table is expected to deduplicate on `(timestamp, metric_name,
/// labels)`; sinks themselves never deduplicate.
#[async_trait]
pub trait RowSink: Send + Sync {
    async fn insert(&self, batch: &StagedBatch) -> Result<()>;

    fn describe(&self) -> String;
}

/// Streams staged JSONEachRow files into a ClickHouse table.
pub struct ClickHouseSink {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseSink {
    pub fn new(client: ClickHouseClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl RowSink for ClickHouseSink {
    async fn insert(&self, batch: &StagedBatch) -> Result<()> {
        let file = tokio::fs::File::open(batch.path()).await?;
        self.client
            .insert_json_each_row(&self.table, &ROW_COLUMNS, file)
            .await?;
        info!(
            table = %self.table,
            rows = batch.rows(),
            bytes = batch.bytes(),
            "Inserted batch"
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("clickhouse table {}", self.table)
    }
}
