//! Streaming conversion of range-query responses into rows.
//!
//! The response is never parsed as a whole document: [`events::JsonEvents`]
//! reads it as a flat event sequence and [`rows::RowStream`] turns that into
//! a lazy iterator of [`crate::model::Row`]s.

pub mod events;
pub mod rows;

pub use events::{Event, JsonEvents};
pub use rows::{RowStream, TransformStats};
