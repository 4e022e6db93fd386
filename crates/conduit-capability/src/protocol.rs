//! Wire shapes for the CapabilityServer's line-delimited JSON protocol
//! (spec.md §4.6 "Message shapes").

use conduit_core::ids::PermissionRequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{type:"permission_request", sessionId, requestId, toolName, input}`,
/// sent by the child.
#[derive(Clone, Debug, Deserialize)]
pub struct PermissionRequestFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "requestId")]
    pub request_id: PermissionRequestId,
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub input: Value,
}

/// A decoded permission request, handed to the server's `on_request`
/// callback for routing through the Bridge to the attached client.
#[derive(Clone, Debug)]
pub struct PermissionRequest {
    pub session_id: String,
    pub request_id: PermissionRequestId,
    pub tool_name: String,
    pub input: Value,
}

impl From<PermissionRequestFrame> for PermissionRequest {
    fn from(frame: PermissionRequestFrame) -> Self {
        Self {
            session_id: frame.session_id,
            request_id: frame.request_id,
            tool_name: frame.tool_name,
            input: frame.input,
        }
    }
}

/// `response:{behavior:"allow", ...} | {behavior:"deny", ...}` (spec.md
/// §4.6).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow {
        #[serde(skip_serializing_if = "Option::is_none", rename = "updatedInput")]
        updated_input: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "allowForSession")]
        allow_for_session: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "toolName")]
        tool_name: Option<String>,
    },
    Deny {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl PermissionDecision {
    /// The synthesized decision used on timeout or child-disconnect
    /// (spec.md §4.6 "Expiry & recovery").
    #[must_use]
    pub fn synthesized_deny(message: impl Into<String>) -> Self {
        Self::Deny { message: Some(message.into()) }
    }
}

/// `{type:"permission_response", sessionId, requestId, response}`, sent
/// to the child.
#[derive(Clone, Debug, Serialize)]
pub struct PermissionResponseFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "requestId")]
    pub request_id: PermissionRequestId,
    pub response: PermissionDecision,
}

impl PermissionResponseFrame {
    #[must_use]
    pub fn new(session_id: String, request_id: PermissionRequestId, response: PermissionDecision) -> Self {
        Self { frame_type: "permission_response", session_id, request_id, response }
    }
}
