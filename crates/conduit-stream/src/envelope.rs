//! Parsing of the child NDJSON envelope (spec.md §6.1, §4.1).
//!
//! The child's JSON is tolerant by contract: "extra fields and unknown
//! subtypes" must not break parsing, and unrecognized `type` values are
//! ignored. We therefore parse through [`serde_json::Value`] rather than a
//! strict derived struct, and fall back to `Unknown` on anything we don't
//! recognize instead of erroring.

use serde_json::Value;

/// A recognized top-level envelope, pre-decomposed into the fields the
/// processor needs (spec.md §4.1 table).
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `system` envelope with `subtype=init`.
    SystemInit {
        /// `session_id`, becomes the session's upstream-session-id.
        upstream_session_id: Option<String>,
        /// Model identifier.
        model: Option<String>,
        /// Raw permission-mode string, if present (validated by the caller).
        permission_mode: Option<String>,
        /// Working directory reported by the child.
        cwd: Option<String>,
        /// Tool names reported as available.
        tools: Vec<String>,
    },
    /// `assistant` envelope: ordered content blocks plus optional usage.
    Assistant {
        /// `message.content[]`, in order.
        content: Vec<Value>,
        /// `message.usage`, if present.
        usage: Option<Value>,
    },
    /// `user` envelope whose `message.content` is a non-string array
    /// (i.e. carries `tool_result` blocks, not a plain user turn).
    User {
        /// `message.content[]`, in order.
        content: Vec<Value>,
    },
    /// `result` envelope.
    Result {
        /// Final text of the turn.
        final_text: Option<String>,
        /// Upstream session id, echoed.
        upstream_session_id: Option<String>,
    },
    /// `control_response` envelope.
    ControlResponse {
        /// The request id this responds to.
        request_id: Option<String>,
        /// Whether the control request succeeded.
        ok: Option<bool>,
        /// Echoed permission mode, if the control request was a mode change.
        mode: Option<String>,
    },
    /// Any envelope whose `type` is absent or not recognized. Silently
    /// ignored by the processor (spec.md §4.1 "Unknown envelope types").
    Unknown,
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn str_list_field(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Decompose a parsed JSON value into an [`Envelope`]. Never fails: an
/// envelope this function cannot classify becomes [`Envelope::Unknown`].
#[must_use]
pub fn parse(value: &Value) -> Envelope {
    let Some(ty) = value.get("type").and_then(Value::as_str) else {
        return Envelope::Unknown;
    };

    match ty {
        "system" if value.get("subtype").and_then(Value::as_str) == Some("init") => {
            Envelope::SystemInit {
                upstream_session_id: str_field(value, "session_id"),
                model: str_field(value, "model"),
                permission_mode: str_field(value, "permissionMode"),
                cwd: str_field(value, "cwd"),
                tools: str_list_field(value, "tools"),
            }
        }
        "assistant" => {
            let content = value
                .pointer("/message/content")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let usage = value.pointer("/message/usage").cloned();
            Envelope::Assistant { content, usage }
        }
        "user" => {
            // Only a non-string content array carries tool_result blocks;
            // plain string content is an echo of our own input and is not
            // re-emitted (spec.md §4.1 table: "message.content[] (non-string)").
            match value.pointer("/message/content") {
                Some(Value::Array(arr)) => Envelope::User {
                    content: arr.clone(),
                },
                _ => Envelope::Unknown,
            }
        }
        "result" => Envelope::Result {
            final_text: str_field(value, "result"),
            upstream_session_id: str_field(value, "session_id"),
        },
        "control_response" => Envelope::ControlResponse {
            request_id: str_field(value, "request_id"),
            ok: value.get("ok").and_then(Value::as_bool),
            mode: str_field(value, "mode"),
        },
        _ => Envelope::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_system_init() {
        let v = json!({
            "type": "system",
            "subtype": "init",
            "session_id": "U-1",
            "permissionMode": "default",
        });
        let env = parse(&v);
        assert_eq!(
            env,
            Envelope::SystemInit {
                upstream_session_id: Some("U-1".into()),
                model: None,
                permission_mode: Some("default".into()),
                cwd: None,
                tools: vec![],
            }
        );
    }

    #[test]
    fn parses_assistant_with_usage() {
        let v = json!({
            "type": "assistant",
            "message": {
                "content": [{"type": "text", "text": "4"}],
                "usage": {"input_tokens": 1, "output_tokens": 1},
            }
        });
        match parse(&v) {
            Envelope::Assistant { content, usage } => {
                assert_eq!(content.len(), 1);
                assert!(usage.is_some());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn user_with_string_content_is_unknown() {
        let v = json!({"type": "user", "message": {"content": "echoed back"}});
        assert_eq!(parse(&v), Envelope::Unknown);
    }

    #[test]
    fn user_with_tool_result_content() {
        let v = json!({
            "type": "user",
            "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": "ok", "is_error": false}]}
        });
        match parse(&v) {
            Envelope::User { content } => assert_eq!(content.len(), 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_result() {
        let v = json!({"type": "result", "result": "4", "session_id": "U-1"});
        assert_eq!(
            parse(&v),
            Envelope::Result {
                final_text: Some("4".into()),
                upstream_session_id: Some("U-1".into()),
            }
        );
    }

    #[test]
    fn unknown_type_is_unknown() {
        let v = json!({"type": "ping"});
        assert_eq!(parse(&v), Envelope::Unknown);
    }

    #[test]
    fn missing_type_is_unknown() {
        let v = json!({"foo": "bar"});
        assert_eq!(parse(&v), Envelope::Unknown);
    }

    #[test]
    fn tolerates_extra_unknown_fields() {
        let v = json!({
            "type": "result",
            "result": "ok",
            "session_id": "U-1",
            "totally_unexpected_field": {"nested": true},
        });
        match parse(&v) {
            Envelope::Result { final_text, .. } => assert_eq!(final_text.as_deref(), Some("ok")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
