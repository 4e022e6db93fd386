//! Events a [`crate::Runner`] publishes to its subscribers.

use conduit_stream::StreamEvent;

/// A lifecycle or decomposed-stream event from a running child.
#[derive(Clone, Debug)]
pub enum RunnerEvent {
    /// The child process was spawned successfully.
    Started,
    /// A decomposed event from the child's `StreamProcessor` (spec.md
    /// §4.1).
    Processor(StreamEvent),
    /// The child process exited.
    Exit {
        /// Process exit code, if the child exited normally.
        code: Option<i32>,
        /// Signal that terminated the child, on Unix.
        signal: Option<i32>,
    },
}
