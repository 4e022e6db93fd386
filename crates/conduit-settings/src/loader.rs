//! Settings loading (SPEC_FULL.md §1 "Configuration"): defaults, then an
//! optional JSON file, then environment variable overrides — the same
//! three-layer priority order as the teacher's `tron-settings` crate, built
//! on `figment` providers instead of the teacher's hand-rolled JSON merge.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;

use crate::errors::Result;
use crate::types::ConduitSettings;

/// Resolve the default settings file path (`~/.conduit/settings.json`).
#[must_use]
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".conduit").join("settings.json")
}

/// Load settings from the default path, with `CONDUIT_*` env var overrides.
pub fn load_settings() -> Result<ConduitSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path, with `CONDUIT_*` env var overrides.
///
/// A missing file is treated as "no user overrides" rather than an error;
/// the figment `Json` provider is simply not joined in that case.
pub fn load_settings_from_path(path: &Path) -> Result<ConduitSettings> {
    let mut figment = Figment::from(Serialized::defaults(ConduitSettings::default()));
    if path.exists() {
        tracing::debug!(?path, "loading settings from file");
        figment = figment.merge(Json::file(path));
    } else {
        tracing::debug!(?path, "settings file not found, using defaults");
    }
    figment = figment.merge(Env::prefixed("CONDUIT_").split("_"));
    Ok(figment.extract()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/conduit-settings.json");
        let settings = load_settings_from_path(path).unwrap();
        let defaults = ConduitSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9999}}"#).unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.port, 9999);
        assert_eq!(settings.server.health_port, 7081);
    }

    #[test]
    fn env_var_overrides_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9999}}"#).unwrap();

        std::env::set_var("CONDUIT_SERVER_PORT", "5555");
        let settings = load_settings_from_path(&path).unwrap();
        std::env::remove_var("CONDUIT_SERVER_PORT");
        assert_eq!(settings.server.port, 5555);
    }
}
