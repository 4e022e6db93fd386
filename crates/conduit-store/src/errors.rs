//! Error type for the session store (spec.md §7, per-crate `thiserror` enum).

use thiserror::Error;

/// Errors raised by [`crate::store::SessionStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON (de)serialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Requested session does not exist (neither ephemeral nor durable).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A binding violated the `(team, channel, thread)` or `session_id`
    /// uniqueness invariant (spec.md §3 "ThreadBinding").
    #[error("binding already exists for ({team}, {channel}, {thread})")]
    BindingConflict {
        /// Team id.
        team: String,
        /// Channel id.
        channel: String,
        /// Thread id.
        thread: String,
    },

    /// Internal invariant violation (e.g. poisoned lock, corrupt row).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<&StoreError> for conduit_core::CoreError {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(id) => Self::SessionNotFound(id.clone()),
            StoreError::BindingConflict { team, channel, thread } => Self::BindingConflict {
                team: team.clone(),
                channel: channel.clone(),
                thread: thread.clone(),
            },
            other => Self::Persistence(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_conflict_message() {
        let err = StoreError::BindingConflict {
            team: "T".into(),
            channel: "C".into(),
            thread: "1.0".into(),
        };
        assert!(err.to_string().contains("T"));
    }

    #[test]
    fn converts_session_not_found_to_core_error() {
        let err = StoreError::SessionNotFound("s1".into());
        let core: conduit_core::CoreError = (&err).into();
        assert_eq!(core.kind(), "SessionNotFound");
    }
}
