//! Promhouse: a recurring batch job that copies Prometheus range data into
//! ClickHouse.
//!
//! Each invocation processes one time window:
//!
//! 1. [`state::JobLock`] refuses to start while a previous run is in flight
//! 2. [`planner::WindowPlanner`] picks the next complete `[start, end)` window
//! 3. a [`source::MetricsSource`] spools the raw range response to disk
//! 4. [`transform::RowStream`] flattens it into [`model::Row`]s event by event
//! 5. [`writer::BatchWriter`] stages the rows, inserts them, and only then
//!    commits the new progress
//!
//! [`job::EtlJob`] ties the steps together. Delivery is at-least-once; the
//! sample table is expected to deduplicate on `(timestamp, metric_name,
//! labels)`.

pub mod cli;
pub mod clickhouse;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod job;
pub mod model;
pub mod planner;
pub mod sink;
pub mod source;
pub mod state;
pub mod transform;
pub mod writer;

pub use error::{Error, FailureKind, Result};
pub use job::{EtlJob, JobFailure, RunOutcome, RunSummary};
pub use model::{JobState, Row, SampleValue, Window};
pub use planner::{Plan, WindowPlanner, WindowPolicy};
