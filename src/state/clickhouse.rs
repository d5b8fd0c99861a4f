//! Job state kept as rows of a ClickHouse table.
//!
//! Every write appends a full record; the latest one wins on read. The table
//! is expected to look like
//!
//! ```sql
//! CREATE TABLE etl_state (
//!     timestamp_progress Nullable(Int64),
//!     timestamp_start Nullable(Int64),
//!     timestamp_end Nullable(Int64),
//!     batch_window_seconds Nullable(Int64),
//!     batch_rows Nullable(UInt64),
//!     batch_skipped_count Nullable(UInt64)
//! ) ENGINE = MergeTree ORDER BY tuple()
//! ```

use super::StateStore;
use crate::clickhouse::ClickHouseClient;
use crate::error::Result;
use crate::model::JobState;
use async_trait::async_trait;

pub const STATE_COLUMNS: [&str; 6] = [
    "timestamp_progress",
    "timestamp_start",
    "timestamp_end",
    "batch_window_seconds",
    "batch_rows",
    "batch_skipped_count",
];

pub struct ClickHouseStateStore {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseStateStore {
    pub fn new(client: ClickHouseClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

/// Newest run first. The start and completion records of one run share
/// timestamp_start, so the completion record sorts ahead of the start mark;
/// among completed records with equal bounds the higher progress wins.
fn latest_state_query(table: &str) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY timestamp_start DESC NULLS LAST, isNull(timestamp_end) ASC, \
         timestamp_end DESC, timestamp_progress DESC LIMIT 1",
        STATE_COLUMNS.join(", "),
        table
    )
}

#[async_trait]
impl StateStore for ClickHouseStateStore {
    async fn read_state(&self) -> Result<Option<JobState>> {
        let rows: Vec<JobState> = self
            .client
            .select_json_each_row(&latest_state_query(&self.table))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn write_state(&self, state: &JobState) -> Result<()> {
        let mut line = serde_json::to_vec(state)?;
        line.push(b'\n');
        self.client
            .insert_json_each_row(&self.table, &STATE_COLUMNS, line)
            .await
    }

    fn describe(&self) -> String {
        format!("clickhouse table {}", self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_row_matches_columns() {
        let json = serde_json::to_value(JobState::seeded(10, 20)).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), STATE_COLUMNS.len());
        for column in STATE_COLUMNS {
            assert!(object.contains_key(column), "missing {}", column);
        }
        assert!(object["batch_rows"].is_null());
    }

    #[test]
    fn test_latest_state_query_breaks_ties_by_end_then_progress() {
        let sql = latest_state_query("etl_state");
        assert_eq!(
            sql,
            "SELECT timestamp_progress, timestamp_start, timestamp_end, batch_window_seconds, \
             batch_rows, batch_skipped_count FROM etl_state ORDER BY timestamp_start DESC NULLS LAST, \
             isNull(timestamp_end) ASC, timestamp_end DESC, timestamp_progress DESC LIMIT 1"
        );
    }
}
