//! Semantic events emitted by the [`crate::processor::StreamProcessor`]
//! (spec.md §4.1 "Emitted events" table).

use conduit_core::tokens::TokenCounters;
use serde_json::Value;

/// One typed event decoded from a single child envelope. A single envelope
/// may produce several events (e.g. an `assistant` envelope with three
/// content blocks and a usage field emits four), always in the order spec.md
/// §4.1 prescribes: content blocks in array order, `usage` last.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `system init` envelope.
    System {
        /// Upstream session id assigned by the child.
        upstream_session_id: Option<String>,
        /// Model identifier.
        model: Option<String>,
        /// Permission mode reported at init, if any.
        permission_mode: Option<String>,
        /// Working directory.
        cwd: Option<String>,
        /// Tool names reported as available.
        tools: Vec<String>,
    },
    /// A `text` content block from an `assistant` envelope.
    Text {
        /// The text content.
        text: String,
    },
    /// A `thinking` content block from an `assistant` envelope.
    Thinking {
        /// The thinking content.
        text: String,
    },
    /// A `tool_use` content block from an `assistant` envelope.
    ToolUse {
        /// The tool-use id the child assigned.
        tool_use_id: String,
        /// The tool name.
        tool_name: String,
        /// Raw tool input, passed through unmodified.
        input: Value,
    },
    /// A `usage` event, emitted once per `assistant` envelope that carried a
    /// `message.usage` field, after all of that envelope's content blocks.
    Usage {
        /// The four token counters for this turn.
        counters: TokenCounters,
    },
    /// A `tool_result` content block from a `user` envelope.
    ToolResult {
        /// The tool-use id this result answers.
        tool_use_id: String,
        /// Result content, serialized to a string (objects are
        /// JSON-serialized per spec.md §4.1).
        content: String,
        /// Whether the tool invocation failed.
        is_error: bool,
    },
    /// A `result` envelope.
    Result {
        /// The turn's final text.
        final_text: Option<String>,
        /// Upstream session id, echoed.
        upstream_session_id: Option<String>,
    },
    /// A `control_response` envelope.
    ControlResponse {
        /// The request id this answers.
        request_id: Option<String>,
        /// Whether the control request succeeded.
        ok: Option<bool>,
        /// The echoed permission mode, if this was a mode-change response.
        mode: Option<String>,
    },
    /// Emitted when `updatePermissionMode` is called with a mode that
    /// actually differs from the cached one (spec.md §4.3 step 4).
    PermissionModeChanged {
        /// The new, now-cached mode.
        mode: String,
    },
}

/// Extract the four usage counters from a `message.usage` JSON object,
/// tolerating missing fields (defaulting to zero) per the envelope's
/// tolerance contract.
pub(crate) fn parse_usage(v: &Value) -> TokenCounters {
    let get = |key: &str| v.get(key).and_then(Value::as_u64).unwrap_or(0);
    TokenCounters {
        input_tokens: get("input_tokens"),
        output_tokens: get("output_tokens"),
        cache_creation_tokens: get("cache_creation_input_tokens"),
        cache_read_tokens: get("cache_read_input_tokens"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_usage_defaults_missing_fields() {
        let counters = parse_usage(&json!({"input_tokens": 5}));
        assert_eq!(counters.input_tokens, 5);
        assert_eq!(counters.output_tokens, 0);
    }

    #[test]
    fn parse_usage_all_fields() {
        let counters = parse_usage(&json!({
            "input_tokens": 1,
            "output_tokens": 2,
            "cache_creation_input_tokens": 3,
            "cache_read_input_tokens": 4,
        }));
        assert_eq!(counters.total(), 10);
    }
}
