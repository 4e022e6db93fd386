//! Per-session turn-buffer accumulation (spec.md §4.7 "Turn-buffer
//! invariant"): text and thinking stream in small increments between the
//! first content of a reply and the next `result`/`exit`; they are held in
//! memory and committed as at most two history entries on flush. This
//! bounds history row count per turn to O(1) regardless of how many
//! streaming chunks the child emitted.

#[derive(Default)]
pub struct TurnBuffer {
    thinking: String,
    text: String,
}

/// The at-most-two entries a flushed [`TurnBuffer`] yields, in the order
/// spec.md §4.7 prescribes: thinking first, then assistant text.
pub struct FlushedTurn {
    pub thinking: Option<String>,
    pub text: Option<String>,
}

impl TurnBuffer {
    pub fn push_text(&mut self, chunk: &str) {
        self.text.push_str(chunk);
    }

    pub fn push_thinking(&mut self, chunk: &str) {
        self.thinking.push_str(chunk);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.thinking.is_empty()
    }

    /// Drain the buffer, returning its two possible history entries.
    #[must_use]
    pub fn flush(&mut self) -> FlushedTurn {
        let thinking = std::mem::take(&mut self.thinking);
        let text = std::mem::take(&mut self.text);
        FlushedTurn {
            thinking: (!thinking.is_empty()).then_some(thinking),
            text: (!text.is_empty()).then_some(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_flushes_to_nothing() {
        let mut buf = TurnBuffer::default();
        let flushed = buf.flush();
        assert!(flushed.thinking.is_none());
        assert!(flushed.text.is_none());
    }

    #[test]
    fn accumulates_across_multiple_pushes() {
        let mut buf = TurnBuffer::default();
        buf.push_thinking("let me ");
        buf.push_thinking("think");
        buf.push_text("here");
        buf.push_text(" is the answer");
        let flushed = buf.flush();
        assert_eq!(flushed.thinking.as_deref(), Some("let me think"));
        assert_eq!(flushed.text.as_deref(), Some("here is the answer"));
    }

    #[test]
    fn flush_drains_the_buffer() {
        let mut buf = TurnBuffer::default();
        buf.push_text("hi");
        let _ = buf.flush();
        assert!(buf.is_empty());
        let second = buf.flush();
        assert!(second.text.is_none());
    }

    #[test]
    fn text_only_omits_thinking_entry() {
        let mut buf = TurnBuffer::default();
        buf.push_text("hi");
        let flushed = buf.flush();
        assert!(flushed.thinking.is_none());
        assert_eq!(flushed.text.as_deref(), Some("hi"));
    }
}
