//! Error type for the Bridge (spec.md §7).

use thiserror::Error;

/// Errors raised while handling a client intent.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The store rejected the operation.
    #[error(transparent)]
    Store(#[from] conduit_store::StoreError),

    /// The manager rejected the operation.
    #[error(transparent)]
    Manager(#[from] conduit_manager::ManagerError),

    /// The capability server rejected the operation.
    #[error(transparent)]
    Capability(#[from] conduit_capability::CapabilityError),

    /// A `permission_response`/`question_response` referenced a request id
    /// that has no session bound to it.
    #[error("no pending request: {0}")]
    UnknownRequest(String),

    /// A client sent a `type` the Bridge does not recognize.
    #[error("unknown intent: {0}")]
    UnknownIntent(String),

    /// A client intent referenced a malformed permission mode, or similar.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// `compact_session` was requested while the session has a live Runner.
    #[error("session is running, cannot compact: {0}")]
    SessionBusy(String),
}

/// Convenience alias for bridge results.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<&BridgeError> for conduit_core::CoreError {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::Store(e) => e.into(),
            BridgeError::Manager(e) => e.into(),
            BridgeError::Capability(e) => e.into(),
            BridgeError::UnknownIntent(i) => Self::UnknownIntent(i.clone()),
            BridgeError::UnknownRequest(r) => Self::Internal(format!("no pending request: {r}")),
            BridgeError::InvalidRequest(r) => Self::Internal(r.clone()),
            BridgeError::SessionBusy(s) => Self::Internal(format!("session is running, cannot compact: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_intent_converts_to_core_error() {
        let err = BridgeError::UnknownIntent("bogus".into());
        let core: conduit_core::CoreError = (&err).into();
        assert_eq!(core.kind(), "UnknownIntent");
    }
}
