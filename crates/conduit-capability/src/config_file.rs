//! Ephemeral capability-endpoint config file lifecycle (spec.md §4.6
//! "Ephemeral config file").

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::errors::{CapabilityError, Result};

/// Path the config file for `session_id` would live at under `base_dir`.
#[must_use]
pub fn config_file_path(base_dir: &Path, session_id: &str) -> PathBuf {
    base_dir.join(format!("capability-{session_id}.json"))
}

/// Write the capability endpoint (host, port, session id) the Runner
/// passes to the child on its command line. Called by the Bridge on
/// `startSession` when permission mediation is enabled.
pub fn write_config_file(base_dir: &Path, session_id: &str, addr: SocketAddr) -> Result<PathBuf> {
    let path = config_file_path(base_dir, session_id);
    let body = serde_json::json!({
        "host": addr.ip().to_string(),
        "port": addr.port(),
        "sessionId": session_id,
    });
    std::fs::write(&path, body.to_string()).map_err(CapabilityError::ConfigFile)?;
    Ok(path)
}

/// Remove the config file on the session's `exit` event. Missing files
/// are not an error — the file may already have been cleaned up.
pub fn remove_config_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    std::fs::remove_file(path).map_err(CapabilityError::ConfigFile)
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    #[test]
    fn writes_and_removes_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 45000);
        let path = write_config_file(dir.path(), "sess-1", addr).unwrap();
        assert!(path.exists());

        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["port"], 45000);
        assert_eq!(value["sessionId"], "sess-1");

        remove_config_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn removing_a_missing_config_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path(), "never-written");
        remove_config_file(&path).unwrap();
    }
}
