//! Unified error types for taint analysis operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by configuration handling and the solver.
///
/// Rule-local classification failures never show up here: a rule that cannot
/// classify a statement simply contributes nothing. Only invalid
/// configurations and panicking solver tasks abort a run.
#[derive(Debug, Error)]
pub enum TaintError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {message}")]
    ConfigIo { path: PathBuf, message: String },

    #[error("failed to parse config file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("solver task panicked: {0}")]
    TaskPanic(String),

    #[error("solver lifecycle error: {0}")]
    Lifecycle(String),

    #[error("failed to serialize results: {0}")]
    ReportSerialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaintError>;
