//! # conduit-stream
//!
//! The StreamProcessor (spec.md §4.1): converts a raw, possibly
//! ANSI-polluted byte stream from a child process into a finite, ordered
//! sequence of typed semantic events.

#![deny(unsafe_code)]

mod ansi;
mod envelope;
mod events;
mod processor;

pub use envelope::Envelope;
pub use events::StreamEvent;
pub use processor::StreamProcessor;
