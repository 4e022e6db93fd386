//! Error type for `RunnerManager` (spec.md §4.4, §7).

use thiserror::Error;

/// Errors raised by [`crate::RunnerManager`] operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `startSession` was called for a session id that already has a
    /// running Runner.
    #[error("session already active: {0}")]
    AlreadyActive(String),

    /// The underlying Runner failed to start its child process.
    #[error(transparent)]
    Runner(#[from] conduit_runner::RunnerError),
}

/// Convenience alias for manager results.
pub type Result<T> = std::result::Result<T, ManagerError>;

impl From<&ManagerError> for conduit_core::CoreError {
    fn from(err: &ManagerError) -> Self {
        match err {
            ManagerError::AlreadyActive(id) => Self::AlreadyActive(id.clone()),
            ManagerError::Runner(e) => e.into(),
        }
    }
}
