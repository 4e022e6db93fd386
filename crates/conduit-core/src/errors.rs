//! Top-level error kinds shared across Conduit crates (spec.md §7).

use serde::{Deserialize, Serialize};

/// Errors shared across the orchestrator (spec.md §7 "Kinds"). Crate-local
/// errors (e.g. `conduit-store::StoreError`) convert into this where they
/// cross a component boundary the Bridge needs to report to the client.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Client referenced an unknown session id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A second `start` was attempted on a session that already has a live
    /// Runner (spec.md §4.4).
    #[error("session already active: {0}")]
    AlreadyActive(String),

    /// Child process failed to spawn.
    #[error("child spawn failed: {0}")]
    ChildSpawnFailed(String),

    /// A tool name failed the `[A-Za-z0-9_\-:/@.]+` / no-leading-dash
    /// validation in spec.md §4.2.
    #[error("invalid tool name: {0}")]
    InvalidToolName(String),

    /// Client sent a `type` the Bridge does not recognize.
    #[error("unknown intent: {0}")]
    UnknownIntent(String),

    /// A `saveBinding` violated the `(team, channel, thread)` uniqueness
    /// invariant (spec.md §4.5).
    #[error("binding already exists for ({team}, {channel}, {thread})")]
    BindingConflict {
        /// Team id.
        team: String,
        /// Channel id.
        channel: String,
        /// Thread id.
        thread: String,
    },

    /// Underlying persistence failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable error-kind tag, used when the Bridge reports an `error` event
    /// to the client (spec.md §7 "User-visible failure behavior").
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SessionNotFound",
            Self::AlreadyActive(_) => "AlreadyActive",
            Self::ChildSpawnFailed(_) => "ChildSpawnFailed",
            Self::InvalidToolName(_) => "InvalidToolName",
            Self::UnknownIntent(_) => "UnknownIntent",
            Self::BindingConflict { .. } => "BindingConflict",
            Self::Persistence(_) => "Persistence",
            Self::Internal(_) => "Internal",
        }
    }
}

/// A serializable representation of an error sent to the client as part of
/// an `error` event (spec.md §7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable kind tag (see [`CoreError::kind`]).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&CoreError> for ErrorBody {
    fn from(err: &CoreError) -> Self {
        Self {
            kind: err.kind().to_owned(),
            message: err.to_string(),
        }
    }
}
