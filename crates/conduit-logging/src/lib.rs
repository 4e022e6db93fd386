//! # conduit-logging
//!
//! Structured logging and metrics for the conduit daemon (SPEC_FULL.md §1):
//! `tracing` subscriber setup with session-tagged spans, and a Prometheus
//! metrics surface for RPC-style intent handling and session/runner activity.

pub mod metrics;
pub mod subscriber;

pub use subscriber::{init_subscriber, session_span};
