//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Running one export cycle
//! - Inspecting the job state
//! - Seeding or resetting the progress mark

pub mod commands;
pub mod handlers;
pub mod options;

pub use handlers::{execute, handle_run, handle_seed, handle_status, init_logging};
pub use options::Cli;
