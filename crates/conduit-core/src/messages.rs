//! The append-only message log model (spec.md §3, MessageItem; §8 invariant
//! "well-formed alternation").

use serde::{Deserialize, Serialize};

use crate::content::{ImageRef, QuestionOptions, SystemInfoSnapshot, ToolResultContent};
use crate::ids::{SessionId, ToolUseId};

/// One entry in a session's append-only message log. Strict insertion order
/// per session (spec.md §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageItem {
    /// A user turn: text plus optional image references.
    User {
        /// The user's text.
        text: String,
        /// Optional attached images.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageRef>,
    },
    /// An assistant reply's final text, flushed at turn end
    /// (spec.md §4.7, turn-buffer invariant).
    Assistant {
        /// The assistant's text.
        text: String,
    },
    /// An assistant's thinking trace, flushed at turn end.
    Thinking {
        /// The thinking text.
        text: String,
    },
    /// A tool invocation requested by the child.
    ToolUse {
        /// Correlates with a later `ToolResult` (invariant: must appear
        /// before any ToolResult referencing it, spec.md §3 invariant).
        tool_use_id: ToolUseId,
        /// Tool name.
        tool_name: String,
        /// Raw tool input.
        input: serde_json::Value,
    },
    /// The result of a previously recorded `ToolUse`.
    ToolResult {
        /// Must reference an earlier `ToolUse` in the same session, or be a
        /// dangling reference admitted during recovery (spec.md §3).
        tool_use_id: ToolUseId,
        /// Result content.
        content: ToolResultContent,
        /// Whether the tool invocation failed.
        is_error: bool,
    },
    /// A structured question posed to the user (`AskUserQuestion`-style
    /// tool use, spec.md §4.7).
    Question {
        /// Correlates with the client's `question_response`.
        request_id: String,
        /// The structured options offered.
        options: QuestionOptions,
    },
    /// A snapshot of the child's `system init` envelope.
    SystemInfo {
        /// The captured fields.
        snapshot: SystemInfoSnapshot,
    },
}

impl MessageItem {
    /// Short discriminant name, used for logging and client-facing type
    /// tags without serializing the whole payload.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Thinking { .. } => "thinking",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::Question { .. } => "question",
            Self::SystemInfo { .. } => "system_info",
        }
    }
}

/// A message row as stored by `conduit-store`: the item plus its position
/// and session, per the `messages` table's `(session_id, seq)` key
/// (spec.md §4.5).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRow {
    /// Owning session.
    pub session_id: SessionId,
    /// Monotonic per-session sequence number.
    pub seq: u64,
    /// The message content.
    pub item: MessageItem,
    /// Insertion timestamp (UTC).
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Validate the "every `ToolResult`'s tool-use-id must appear in an earlier
/// `ToolUse`" invariant (spec.md §3, §8) over an in-order slice of items.
/// Returns the first offending `tool_use_id`, if any, unless `allow_dangling`
/// is set (recovery mode, spec.md §3).
#[must_use]
pub fn find_dangling_tool_result(items: &[MessageItem], allow_dangling: bool) -> Option<ToolUseId> {
    if allow_dangling {
        return None;
    }
    let mut seen = std::collections::HashSet::new();
    for item in items {
        match item {
            MessageItem::ToolUse { tool_use_id, .. } => {
                let _ = seen.insert(tool_use_id.clone());
            }
            MessageItem::ToolResult { tool_use_id, .. } if !seen.contains(tool_use_id) => {
                return Some(tool_use_id.clone());
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(
            MessageItem::User {
                text: "hi".into(),
                images: vec![]
            }
            .kind(),
            "user"
        );
        assert_eq!(MessageItem::Assistant { text: "ok".into() }.kind(), "assistant");
    }

    #[test]
    fn tool_result_before_tool_use_is_dangling() {
        let tid = ToolUseId::new();
        let items = vec![MessageItem::ToolResult {
            tool_use_id: tid.clone(),
            content: ToolResultContent::Text("x".into()),
            is_error: false,
        }];
        assert_eq!(find_dangling_tool_result(&items, false), Some(tid));
    }

    #[test]
    fn tool_result_after_tool_use_is_fine() {
        let tid = ToolUseId::new();
        let items = vec![
            MessageItem::ToolUse {
                tool_use_id: tid.clone(),
                tool_name: "Bash".into(),
                input: serde_json::json!({"command": "ls"}),
            },
            MessageItem::ToolResult {
                tool_use_id: tid,
                content: ToolResultContent::Text("out".into()),
                is_error: false,
            },
        ];
        assert!(find_dangling_tool_result(&items, false).is_none());
    }

    #[test]
    fn dangling_admitted_during_recovery() {
        let tid = ToolUseId::new();
        let items = vec![MessageItem::ToolResult {
            tool_use_id: tid,
            content: ToolResultContent::Text("x".into()),
            is_error: false,
        }];
        assert!(find_dangling_tool_result(&items, true).is_none());
    }

    #[test]
    fn message_item_serde_roundtrip() {
        let item = MessageItem::ToolUse {
            tool_use_id: ToolUseId::from("t1"),
            tool_name: "Bash".into(),
            input: serde_json::json!({"command": "ls"}),
        };
        let json = serde_json::to_string(&item).unwrap();
        let back: MessageItem = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);
    }
}
