//! # conduit-core
//!
//! Foundation types shared by every Conduit crate: branded IDs, the message
//! and content model, permission primitives, token accounting, and the
//! top-level error type.

#![deny(unsafe_code)]

pub mod content;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod permissions;
pub mod session;
pub mod tokens;

pub use errors::CoreError;
