//! Error types for the promhouse export job.
//!
//! Every fatal condition a run can hit is an [`Error`]. [`Error::kind`] folds
//! the variants onto the four outcomes operators alert on: setup problems,
//! a concurrent run holding the job, transport failures and everything else.

use std::result;
use thiserror::Error;

/// A specialized Result type for promhouse operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for promhouse operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Job state is missing or unusable; an operator has to seed it.
    #[error("Setup error: {0}")]
    Setup(String),

    /// Another run holds the job.
    #[error("Job is already running (started at {started_at})")]
    AlreadyRunning { started_at: i64 },

    /// Network, auth, TLS or non-success status from a remote service.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote service answered with something we cannot interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse failure categories used for exit codes and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Setup,
    AlreadyRunning,
    Transport,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Setup => "setup",
            FailureKind::AlreadyRunning => "already_running",
            FailureKind::Transport => "transport",
            FailureKind::Internal => "internal",
        }
    }

    /// Process exit code reported for this category.
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureKind::Internal => 1,
            FailureKind::Setup => 2,
            FailureKind::AlreadyRunning => 3,
            FailureKind::Transport => 4,
        }
    }
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Setup(_) | Error::Config(_) => FailureKind::Setup,
            Error::AlreadyRunning { .. } => FailureKind::AlreadyRunning,
            Error::Transport(_) | Error::InvalidResponse(_) => FailureKind::Transport,
            Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => FailureKind::Internal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::InvalidResponse(err.to_string())
        } else {
            Error::Transport(err.to_string())
        }
    }
}
