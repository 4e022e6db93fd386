//! Content block primitives that appear inside [`crate::messages::MessageItem`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An image reference attached to a user turn (spec.md §3, MessageItem::User).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Path to the transient attachment file (spec.md §6.4).
    pub path: String,
    /// MIME type, e.g. `image/png`.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// A single structured option offered by a `Question` message (spec.md §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Stable key identifying this option in the answer payload.
    pub key: String,
    /// Human-readable label.
    pub label: String,
}

/// Structured options carried by a `Question` message item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuestionOptions {
    /// The question text shown to the user.
    pub prompt: String,
    /// The offered choices.
    pub options: Vec<QuestionOption>,
}

/// A snapshot of `system init` fields, stored verbatim as history context
/// (spec.md §3, MessageItem::SystemInfo).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemInfoSnapshot {
    /// Upstream session id assigned by the child, if present.
    #[serde(rename = "upstreamSessionId", skip_serializing_if = "Option::is_none")]
    pub upstream_session_id: Option<String>,
    /// Model identifier reported by the child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Permission mode reported by the child.
    #[serde(rename = "permissionMode", skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    /// Working directory reported by the child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Tool names reported as available by the child.
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Serializable content of a `ToolResult` message (spec.md §3: "content as
/// string, serialize objects").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    /// Plain text result.
    Text(String),
    /// A structured result, stored as-is and rendered as a string on demand.
    Structured(Value),
}

impl ToolResultContent {
    /// Render this content as the string form the StreamProcessor emits on
    /// the wire (objects are JSON-serialized; see spec.md §4.1).
    #[must_use]
    pub fn as_display_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Structured(v) => serde_json::to_string(v).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_content_serializes_to_string() {
        let content = ToolResultContent::Structured(serde_json::json!({"a": 1}));
        assert_eq!(content.as_display_string(), r#"{"a":1}"#);
    }

    #[test]
    fn text_content_passes_through() {
        let content = ToolResultContent::Text("file1 file2".into());
        assert_eq!(content.as_display_string(), "file1 file2");
    }
}
