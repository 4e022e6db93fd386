//! Branded ID newtypes for type safety.
//!
//! Every entity in Conduit has a distinct ID type implemented as a newtype
//! wrapper around `String`, so a session ID can never be passed where a
//! request ID is expected. IDs are UUID v7 (time-ordered) unless the value
//! is supplied externally (e.g. an upstream session id assigned by a child
//! process).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Wrap an existing string value (e.g. one assigned by a child process).
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a session (spec.md §3, "Session").
    SessionId
}

branded_id! {
    /// Identifier assigned by the child process on its first `system init`,
    /// used to resume a conversation on a later run (spec.md §3, glossary).
    UpstreamSessionId
}

branded_id! {
    /// Identifier for a tool-use / tool-result pair within a turn.
    ToolUseId
}

branded_id! {
    /// Identifier for an in-band control request sent to the child.
    ControlRequestId
}

branded_id! {
    /// Identifier for an out-of-band permission request routed through the
    /// CapabilityServer.
    PermissionRequestId
}

branded_id! {
    /// Identifier for a client socket connection.
    ConnectionId
}
