//! Session metadata and lifecycle status (spec.md §3 "Session"; SPEC_FULL.md
//! §3 supplemental fields).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UpstreamSessionId};
use crate::permissions::PermissionMode;
use crate::tokens::TokenCounters;

/// A session's current lifecycle status (spec.md §3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// No child running, nothing pending.
    #[default]
    Idle,
    /// A child is running and processing a turn.
    Running,
    /// A tool call is blocked on a `permission_response` from the client
    /// (spec.md §4.6).
    WaitingPermission,
    /// The child is awaiting the next user turn.
    WaitingInput,
}

/// Session metadata (spec.md §3). The message log itself is stored
/// separately, keyed by `id` (see `conduit-store`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier.
    pub id: SessionId,
    /// Display name. `None` iff the session is ephemeral (spec.md §3).
    pub name: Option<String>,
    /// Working-directory path passed to the child.
    pub working_dir: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent durable mutation (SPEC_FULL.md §3).
    pub last_activity_at: DateTime<Utc>,
    /// Set when the session was explicitly ended, distinguishing "never
    /// run" from "ended" (SPEC_FULL.md §3).
    pub ended_at: Option<DateTime<Utc>>,
    /// Assigned by the child on first run; used to resume (spec.md §3).
    pub upstream_session_id: Option<UpstreamSessionId>,
    /// Last-used model identifier.
    pub model: Option<String>,
    /// Current permission mode.
    pub permission_mode: PermissionMode,
    /// Cumulative token counters across all models.
    pub usage: TokenCounters,
    /// Cumulative token counters broken down by model.
    pub usage_by_model: BTreeMap<String, TokenCounters>,
}

impl Session {
    /// Construct a fresh session at creation time. Per spec.md §3, a
    /// session created with no explicit `name` starts ephemeral.
    #[must_use]
    pub fn new(id: SessionId, name: Option<String>, working_dir: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            working_dir: working_dir.into(),
            status: SessionStatus::Idle,
            created_at: now,
            last_activity_at: now,
            ended_at: None,
            upstream_session_id: None,
            model: None,
            permission_mode: PermissionMode::Default,
            usage: TokenCounters::default(),
            usage_by_model: BTreeMap::new(),
        }
    }

    /// Whether this session was created without an explicit name — the
    /// ephemeral-on-creation rule (spec.md §3).
    #[must_use]
    pub fn is_ephemeral_on_creation(&self) -> bool {
        self.name.is_none()
    }

    /// Accumulate usage both overall and per-model (spec.md §4.5
    /// `addUsage`/`addModelUsage`, invariant I2: additive only).
    pub fn record_usage(&mut self, model: &str, counters: TokenCounters) {
        self.usage = self.usage.saturating_add(&counters);
        let entry = self.usage_by_model.entry(model.to_owned()).or_default();
        *entry = entry.saturating_add(&counters);
    }
}

/// A (team, channel, thread) to session binding for external integrations
/// (spec.md §3 "ThreadBinding"). Unique on the triple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadBinding {
    /// External team/workspace identifier.
    pub team: String,
    /// External channel identifier.
    pub channel: String,
    /// External thread identifier.
    pub thread: String,
    /// The session bound to this thread.
    pub session_id: SessionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_ephemeral_without_name() {
        let s = Session::new(SessionId::new(), None, "/work");
        assert!(s.is_ephemeral_on_creation());
    }

    #[test]
    fn named_session_is_not_ephemeral() {
        let s = Session::new(SessionId::new(), Some("my session".into()), "/work");
        assert!(!s.is_ephemeral_on_creation());
    }

    #[test]
    fn record_usage_accumulates_overall_and_per_model() {
        let mut s = Session::new(SessionId::new(), None, "/work");
        s.record_usage(
            "claude-opus",
            TokenCounters {
                input_tokens: 10,
                output_tokens: 5,
                cache_creation_tokens: 0,
                cache_read_tokens: 0,
            },
        );
        s.record_usage(
            "claude-opus",
            TokenCounters {
                input_tokens: 3,
                output_tokens: 1,
                cache_creation_tokens: 0,
                cache_read_tokens: 0,
            },
        );
        assert_eq!(s.usage.input_tokens, 13);
        assert_eq!(s.usage_by_model["claude-opus"].input_tokens, 13);
    }

    #[test]
    fn default_status_is_idle() {
        assert_eq!(SessionStatus::default(), SessionStatus::Idle);
    }
}
