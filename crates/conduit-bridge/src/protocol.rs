//! Client socket wire protocol: inbound intents and outbound messages
//! (spec.md §4.7 "Inbound client intents" / "Outbound event translation",
//! §6.2).

use conduit_capability::PermissionDecision;
use conduit_core::content::{ImageRef, QuestionOptions, SystemInfoSnapshot};
use conduit_core::messages::MessageRow;
use conduit_core::session::{Session, ThreadBinding};
use conduit_core::tokens::TokenCounters;
use conduit_core::errors::ErrorBody;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One inbound message from a client (spec.md §4.7). `sessionId` is present
/// on every per-session variant, per §6.2.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    ListSessions,
    CreateSession {
        name: Option<String>,
        #[serde(rename = "workingDir")]
        working_dir: Option<String>,
    },
    AttachSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    DeleteSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    RenameSession {
        #[serde(rename = "sessionId")]
        session_id: String,
        name: String,
    },
    SetPermissionMode {
        #[serde(rename = "sessionId")]
        session_id: String,
        mode: String,
    },
    SetModel {
        #[serde(rename = "sessionId")]
        session_id: String,
        model: String,
    },
    UserMessage {
        #[serde(rename = "sessionId")]
        session_id: String,
        content: String,
        #[serde(default)]
        images: Vec<ImageRef>,
    },
    Interrupt {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    PermissionResponse {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        response: ClientPermissionDecision,
    },
    QuestionResponse {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        answers: Value,
    },
    CompactSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Supplemental (SPEC_FULL.md §4.7).
    GetHistory {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Supplemental (SPEC_FULL.md §4.7).
    ListBindings,
    /// Supplemental (SPEC_FULL.md §4.7).
    Ping,
}

impl Intent {
    /// Short discriminant name, used as a metrics label without serializing
    /// the whole intent.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ListSessions => "list_sessions",
            Self::CreateSession { .. } => "create_session",
            Self::AttachSession { .. } => "attach_session",
            Self::DeleteSession { .. } => "delete_session",
            Self::RenameSession { .. } => "rename_session",
            Self::SetPermissionMode { .. } => "set_permission_mode",
            Self::SetModel { .. } => "set_model",
            Self::UserMessage { .. } => "user_message",
            Self::Interrupt { .. } => "interrupt",
            Self::PermissionResponse { .. } => "permission_response",
            Self::QuestionResponse { .. } => "question_response",
            Self::CompactSession { .. } => "compact_session",
            Self::GetHistory { .. } => "get_history",
            Self::ListBindings => "list_bindings",
            Self::Ping => "ping",
        }
    }
}

/// The client's side of a permission decision (spec.md §4.6, §6.3). Kept
/// distinct from [`conduit_capability::PermissionDecision`], which is
/// server-to-child only and not `Deserialize`.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum ClientPermissionDecision {
    Allow {
        #[serde(rename = "updatedInput")]
        updated_input: Option<Value>,
        #[serde(rename = "allowForSession")]
        allow_for_session: Option<bool>,
        #[serde(rename = "toolName")]
        tool_name: Option<String>,
    },
    Deny {
        message: Option<String>,
    },
}

impl From<ClientPermissionDecision> for PermissionDecision {
    fn from(d: ClientPermissionDecision) -> Self {
        match d {
            ClientPermissionDecision::Allow { updated_input, allow_for_session, tool_name } => {
                Self::Allow { updated_input, allow_for_session, tool_name }
            }
            ClientPermissionDecision::Deny { message } => Self::Deny { message },
        }
    }
}

/// One outbound message to a client (spec.md §4.7 translation table, §6.2).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    TextOutput {
        #[serde(rename = "sessionId")]
        session_id: String,
        text: String,
    },
    ThinkingOutput {
        #[serde(rename = "sessionId")]
        session_id: String,
        text: String,
    },
    AskUserQuestion {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(flatten)]
        options: QuestionOptions,
    },
    ToolUse {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolResult {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        content: String,
        #[serde(rename = "isError")]
        is_error: bool,
    },
    UsageInfo {
        #[serde(rename = "sessionId")]
        session_id: String,
        usage: TokenCounters,
    },
    SystemInfo {
        #[serde(rename = "sessionId")]
        session_id: String,
        snapshot: SystemInfoSnapshot,
    },
    Result {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "finalText")]
        final_text: Option<String>,
    },
    Error {
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
        error: ErrorBody,
    },
    PermissionRequest {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    /// Periodic telemetry broadcast to all connected clients (spec.md §6.2).
    GlobalUsage {
        #[serde(rename = "totalTokens")]
        total_tokens: u64,
        #[serde(rename = "activeSessions")]
        active_sessions: usize,
    },
    Pong,
    SessionList {
        sessions: Vec<Session>,
    },
    SessionAttached {
        session: Session,
        history: Vec<MessageRow>,
    },
    History {
        #[serde(rename = "sessionId")]
        session_id: String,
        history: Vec<MessageRow>,
    },
    Bindings {
        bindings: Vec<ThreadBinding>,
    },
    Ack {
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
    },
}
