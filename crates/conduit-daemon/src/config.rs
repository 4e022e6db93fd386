//! Daemon HTTP server configuration, derived from [`conduit_settings::ServerSettings`].

use conduit_settings::ServerSettings;

/// Bind and connection-limit settings for the daemon's Axum server.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub max_message_size: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port: 0, max_connections: 256, max_message_size: 16 * 1024 * 1024 }
    }
}

impl From<&ServerSettings> for DaemonConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self { host: settings.host.clone(), port: settings.port, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_auto_assign() {
        assert_eq!(DaemonConfig::default().port, 0);
    }

    #[test]
    fn from_server_settings_carries_host_and_port() {
        let settings = ServerSettings { host: "0.0.0.0".into(), port: 7080, ..ServerSettings::default() };
        let cfg = DaemonConfig::from(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 7080);
    }
}
