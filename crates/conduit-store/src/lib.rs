//! # conduit-store
//!
//! The SessionStore (spec.md §4.5): durable `SQLite`-backed session
//! metadata, per-turn message log, token-usage rollups, and thread
//! bindings, fronted by an ephemeral tier for unnamed sessions.

#![deny(unsafe_code)]

mod connection;
mod errors;
mod migrations;
mod pending;
mod row_types;
mod store;

pub use connection::{ConnectionConfig, ConnectionPool};
pub use errors::{Result, StoreError};
pub use store::SessionStore;
