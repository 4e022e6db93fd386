//! The StreamProcessor itself (spec.md §4.1).

use conduit_core::permissions::PermissionMode;
use serde_json::Value;

use crate::ansi::strip_ansi;
use crate::envelope::{self, Envelope};
use crate::events::{parse_usage, StreamEvent};

/// Converts a raw, chunked, possibly ANSI-polluted byte stream into an
/// ordered sequence of [`StreamEvent`]s. Stateful across chunks in exactly
/// two ways (spec.md §4.1 "Stateless across frames except for"): the
/// pending-line byte buffer, and the cached permission mode.
#[derive(Debug, Default)]
pub struct StreamProcessor {
    buffer: String,
    permission_mode: Option<PermissionMode>,
}

impl StreamProcessor {
    /// A fresh processor with no buffered partial line and no cached mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The permission mode last confirmed via `updatePermissionMode`, if any.
    #[must_use]
    pub fn permission_mode(&self) -> Option<PermissionMode> {
        self.permission_mode
    }

    /// Feed a chunk of raw bytes from the child's combined stdout/PTY
    /// output. Chunks may split frames anywhere, including inside an escape
    /// sequence; the byte buffer absorbs this. Returns the events decoded
    /// from every complete line now available, in order.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        loop {
            let Some(newline_pos) = self.buffer.find('\n') else {
                break;
            };
            let line = self.buffer[..newline_pos].to_owned();
            self.buffer.drain(..=newline_pos);
            self.process_line(&line, &mut events);
        }
        events
    }

    /// Flush the processor under the assumption no more data is coming. Any
    /// remaining buffered fragment is treated as never having been newline
    /// terminated and is discarded without emitting events, matching the
    /// framing rule that only complete lines are parsed.
    pub fn flush(&mut self) {
        self.buffer.clear();
    }

    fn process_line(&mut self, raw: &str, events: &mut Vec<StreamEvent>) {
        let stripped = strip_ansi(raw);
        let trimmed = stripped.trim();
        if !trimmed.starts_with('{') {
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            return;
        };
        self.decompose(&value, events);
    }

    fn decompose(&mut self, value: &Value, events: &mut Vec<StreamEvent>) {
        match envelope::parse(value) {
            Envelope::SystemInit {
                upstream_session_id,
                model,
                permission_mode,
                cwd,
                tools,
            } => {
                events.push(StreamEvent::System {
                    upstream_session_id,
                    model,
                    permission_mode: permission_mode.clone(),
                    cwd,
                    tools,
                });
                if let Some(raw_mode) = permission_mode {
                    self.update_permission_mode(&raw_mode, events);
                }
            }
            Envelope::Assistant { content, usage } => {
                for block in &content {
                    decompose_content_block(block, events);
                }
                if let Some(usage) = usage {
                    events.push(StreamEvent::Usage {
                        counters: parse_usage(&usage),
                    });
                }
            }
            Envelope::User { content } => {
                for block in &content {
                    decompose_tool_result_block(block, events);
                }
            }
            Envelope::Result {
                final_text,
                upstream_session_id,
            } => {
                events.push(StreamEvent::Result {
                    final_text,
                    upstream_session_id,
                });
            }
            Envelope::ControlResponse {
                request_id,
                ok,
                mode,
            } => {
                events.push(StreamEvent::ControlResponse {
                    request_id,
                    ok,
                    mode: mode.clone(),
                });
                if let Some(raw_mode) = mode {
                    self.update_permission_mode(&raw_mode, events);
                }
            }
            Envelope::Unknown => {}
        }
    }

    /// Confirm a permission-mode transition (spec.md §4.3 step 4): update
    /// the cached mode and emit `permission_mode_changed` iff it actually
    /// differs from the previously cached value. An unrecognized mode
    /// string is ignored rather than clearing the cache.
    fn update_permission_mode(&mut self, raw: &str, events: &mut Vec<StreamEvent>) {
        let Some(mode) = PermissionMode::parse(raw) else {
            return;
        };
        if self.permission_mode != Some(mode) {
            self.permission_mode = Some(mode);
            events.push(StreamEvent::PermissionModeChanged {
                mode: mode.as_str().to_owned(),
            });
        }
    }
}

fn decompose_content_block(block: &Value, events: &mut Vec<StreamEvent>) {
    match block.get("type").and_then(Value::as_str) {
        Some("text") => {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                events.push(StreamEvent::Text { text: text.to_owned() });
            }
        }
        Some("thinking") => {
            if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                events.push(StreamEvent::Thinking { text: text.to_owned() });
            }
        }
        Some("tool_use") => {
            let tool_use_id = block.get("id").and_then(Value::as_str).unwrap_or_default();
            let tool_name = block.get("name").and_then(Value::as_str).unwrap_or_default();
            let input = block.get("input").cloned().unwrap_or(Value::Null);
            events.push(StreamEvent::ToolUse {
                tool_use_id: tool_use_id.to_owned(),
                tool_name: tool_name.to_owned(),
                input,
            });
        }
        _ => {}
    }
}

fn decompose_tool_result_block(block: &Value, events: &mut Vec<StreamEvent>) {
    if block.get("type").and_then(Value::as_str) != Some("tool_result") {
        return;
    }
    let tool_use_id = block
        .get("tool_use_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    let content = match block.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
        None => String::new(),
    };
    events.push(StreamEvent::ToolResult {
        tool_use_id,
        content,
        is_error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line(v: &Value) -> String {
        format!("{}\n", serde_json::to_string(v).unwrap())
    }

    #[test]
    fn split_frame_invariant_arbitrary_chunk_boundary() {
        let raw = line(&json!({"type": "result", "result": "4", "session_id": "U-1"}));
        let whole = {
            let mut p = StreamProcessor::new();
            p.process_chunk(raw.as_bytes())
        };
        for split in 0..raw.len() {
            let mut p = StreamProcessor::new();
            let mut got = p.process_chunk(raw[..split].as_bytes());
            got.extend(p.process_chunk(raw[split..].as_bytes()));
            assert_eq!(got, whole, "mismatch splitting at byte {split}");
        }
    }

    #[test]
    fn split_mid_escape_sequence_still_parses() {
        let raw = "\x1b[?25l{\"type\":\"result\",\"result\":\"ok\"}\x1b[0m\n";
        let mid = 3; // inside the leading CSI sequence
        let mut p = StreamProcessor::new();
        let mut got = p.process_chunk(raw[..mid].as_bytes());
        got.extend(p.process_chunk(raw[mid..].as_bytes()));
        assert_eq!(
            got,
            vec![StreamEvent::Result {
                final_text: Some("ok".into()),
                upstream_session_id: None,
            }]
        );
    }

    #[test]
    fn ansi_polluted_stream_parses_identically_to_clean() {
        let clean = line(&json!({"type": "result", "result": "4", "session_id": "U-1"}));
        let polluted = format!("\x1b[?25l{}\x1b[0m\r\n", clean.trim_end());

        let mut clean_proc = StreamProcessor::new();
        let clean_events = clean_proc.process_chunk(clean.as_bytes());

        let mut dirty_proc = StreamProcessor::new();
        let dirty_events = dirty_proc.process_chunk(polluted.as_bytes());

        assert_eq!(clean_events, dirty_events);
    }

    #[test]
    fn malformed_line_is_dropped_with_no_side_effect() {
        let mut p = StreamProcessor::new();
        let events = p.process_chunk(b"not json at all\n{\"type\":\"flerp\n");
        assert!(events.is_empty());
        // buffer holds the trailing unterminated fragment only
        let more = p.process_chunk(b"\n");
        assert!(more.is_empty());
    }

    #[test]
    fn non_brace_prefixed_line_is_dropped() {
        let mut p = StreamProcessor::new();
        let events = p.process_chunk(b"[DEBUG] starting up\n");
        assert!(events.is_empty());
    }

    #[test]
    fn assistant_content_blocks_then_usage_in_order() {
        let mut p = StreamProcessor::new();
        let v = json!({
            "type": "assistant",
            "message": {
                "content": [
                    {"type": "text", "text": "thinking about it"},
                    {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}},
                ],
                "usage": {"input_tokens": 10, "output_tokens": 2},
            }
        });
        let events = p.process_chunk(line(&v).as_bytes());
        assert_eq!(
            events,
            vec![
                StreamEvent::Text {
                    text: "thinking about it".into()
                },
                StreamEvent::ToolUse {
                    tool_use_id: "t1".into(),
                    tool_name: "Bash".into(),
                    input: json!({"command": "ls"}),
                },
                StreamEvent::Usage {
                    counters: conduit_core::tokens::TokenCounters {
                        input_tokens: 10,
                        output_tokens: 2,
                        cache_creation_tokens: 0,
                        cache_read_tokens: 0,
                    }
                },
            ]
        );
    }

    #[test]
    fn tool_result_content_object_is_serialized_to_string() {
        let mut p = StreamProcessor::new();
        let v = json!({
            "type": "user",
            "message": {
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": "t1",
                    "content": {"files": ["a.rs", "b.rs"]},
                    "is_error": false,
                }]
            }
        });
        let events = p.process_chunk(line(&v).as_bytes());
        assert_eq!(
            events,
            vec![StreamEvent::ToolResult {
                tool_use_id: "t1".into(),
                content: r#"{"files":["a.rs","b.rs"]}"#.into(),
                is_error: false,
            }]
        );
    }

    #[test]
    fn system_init_with_mode_emits_system_then_mode_changed() {
        let mut p = StreamProcessor::new();
        let v = json!({
            "type": "system",
            "subtype": "init",
            "session_id": "U-1",
            "model": "claude",
            "permissionMode": "acceptEdits",
            "cwd": "/work",
            "tools": ["Bash", "Write"],
        });
        let events = p.process_chunk(line(&v).as_bytes());
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::System { .. }));
        assert_eq!(
            events[1],
            StreamEvent::PermissionModeChanged {
                mode: "acceptEdits".into()
            }
        );
        assert_eq!(p.permission_mode(), Some(PermissionMode::AcceptEdits));
    }

    #[test]
    fn permission_mode_changed_only_emitted_on_actual_change() {
        let mut p = StreamProcessor::new();
        let init = json!({
            "type": "system", "subtype": "init", "session_id": "U-1",
            "permissionMode": "default",
        });
        let first = p.process_chunk(line(&init).as_bytes());
        assert!(first.iter().any(|e| matches!(e, StreamEvent::PermissionModeChanged { .. })));

        let control_resp = json!({"type": "control_response", "request_id": "r1", "ok": true, "mode": "default"});
        let second = p.process_chunk(line(&control_resp).as_bytes());
        assert!(!second.iter().any(|e| matches!(e, StreamEvent::PermissionModeChanged { .. })));
    }

    #[test]
    fn control_response_mode_change_confirms_transition() {
        let mut p = StreamProcessor::new();
        let control_resp = json!({"type": "control_response", "request_id": "r1", "ok": true, "mode": "plan"});
        let events = p.process_chunk(line(&control_resp).as_bytes());
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            StreamEvent::PermissionModeChanged { mode: "plan".into() }
        );
    }

    #[test]
    fn unknown_envelope_type_emits_nothing() {
        let mut p = StreamProcessor::new();
        let v = json!({"type": "heartbeat", "ts": 1234});
        let events = p.process_chunk(line(&v).as_bytes());
        assert!(events.is_empty());
    }

    #[test]
    fn partial_line_across_two_chunks_is_buffered() {
        let mut p = StreamProcessor::new();
        let v = json!({"type": "result", "result": "ok", "session_id": "U-1"});
        let whole = line(&v);
        let (first, second) = whole.split_at(whole.len() / 2);
        assert!(p.process_chunk(first.as_bytes()).is_empty());
        let events = p.process_chunk(second.as_bytes());
        assert_eq!(events.len(), 1);
    }
}
