//! Error type for the CapabilityServer (spec.md §4.6, §7).

use thiserror::Error;

/// Errors raised by [`crate::CapabilityServer`] operations.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Failed to bind the loopback listener.
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    /// Failed to write or remove the ephemeral config file.
    #[error("config file error: {0}")]
    ConfigFile(#[source] std::io::Error),

    /// A `deliver_response` call referenced a request id with no pending
    /// entry (already resolved by timeout or disconnect, or never seen).
    #[error("no pending permission request: {0}")]
    UnknownRequest(String),
}

/// Convenience alias for capability-server results.
pub type Result<T> = std::result::Result<T, CapabilityError>;

impl From<&CapabilityError> for conduit_core::CoreError {
    fn from(err: &CapabilityError) -> Self {
        conduit_core::CoreError::Internal(err.to_string())
    }
}
