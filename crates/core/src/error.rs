// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers submitting work.
///
/// Failures inside a job (bad input, a failing or panicking body) never show
/// up here: they end the job in `Failed` state with an ERROR event instead.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job {0} has already been submitted")]
    AlreadySubmitted(String),

    #[error("Invalid input for {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("Executor has been shut down")]
    ExecutorClosed,

    #[error("Failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl JobError {
    pub fn invalid_input(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn spawn(what: &'static str, source: std::io::Error) -> Self {
        Self::Spawn { what, source }
    }
}

/// Errors that can occur while loading [`JobwireConfig`](crate::config::JobwireConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}
