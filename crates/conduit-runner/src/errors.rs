//! Error type for the Runner (spec.md §7).

use thiserror::Error;

/// Errors raised by [`crate::Runner`] operations.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A second `start` was attempted while a child is already attached
    /// (spec.md §4.2).
    #[error("child already running")]
    AlreadyRunning,

    /// An operation requiring a live child was attempted with none
    /// attached.
    #[error("child not running")]
    NotRunning,

    /// The child process failed to spawn.
    #[error("child spawn failed: {0}")]
    ChildSpawnFailed(String),

    /// A tool name failed the `[A-Za-z0-9_\-:/@.]+` / no-leading-dash
    /// validation (spec.md §4.2).
    #[error("invalid tool name: {0}")]
    InvalidToolName(String),

    /// Underlying I/O failure talking to the child.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for runner results.
pub type Result<T> = std::result::Result<T, RunnerError>;

impl From<&RunnerError> for conduit_core::CoreError {
    fn from(err: &RunnerError) -> Self {
        match err {
            RunnerError::ChildSpawnFailed(m) => Self::ChildSpawnFailed(m.clone()),
            RunnerError::InvalidToolName(m) => Self::InvalidToolName(m.clone()),
            other => Self::Internal(other.to_string()),
        }
    }
}
