//! # conduit-settings
//!
//! Layered configuration for the conduit daemon (SPEC_FULL.md §1
//! "Configuration"): compiled defaults, an optional `~/.conduit/settings.json`
//! file, then `CONDUIT_*` environment variable overrides — the same priority
//! order as the teacher's `tron-settings` crate.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::*;
