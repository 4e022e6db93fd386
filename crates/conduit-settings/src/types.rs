//! Settings type definitions (SPEC_FULL.md §1 "Configuration").
//!
//! All types implement [`Default`] with production default values and use
//! `#[serde(default)]` so a partial settings file only overrides the keys it
//! names.

use serde::{Deserialize, Serialize};

/// Root settings type for the conduit daemon.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitSettings {
    /// Database and session settings.
    pub store: StoreSettings,
    /// Client socket and capability server network settings.
    pub server: ServerSettings,
    /// Child process spawning defaults.
    pub runner: RunnerSettings,
    /// Logging and metrics configuration.
    pub logging: LoggingSettings,
}

impl Default for ConduitSettings {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            server: ServerSettings::default(),
            runner: RunnerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// `conduit-store` settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Path to the SQLite database file.
    pub database_path: String,
    /// How long an unnamed (ephemeral) session survives without activity
    /// before `prune_ephemeral_older_than` may reclaim it, in seconds.
    pub ephemeral_ttl_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { database_path: "conduit.db".to_string(), ephemeral_ttl_secs: 3600 }
    }
}

/// Client socket and capability server bind settings (spec.md §6.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address for the client-facing socket.
    pub host: String,
    /// Client socket port.
    pub port: u16,
    /// Capability server bind host (loopback only).
    pub capability_host: String,
    /// Capability server port. `0` lets the OS assign an ephemeral port.
    pub capability_port: u16,
    /// Base directory new sessions' working directories are created under.
    pub default_working_dir_base: String,
    /// Base directory ephemeral capability-config files are written to.
    pub capability_config_base_dir: String,
    /// Permission round-trip timeout in milliseconds (spec.md §5, default 30s).
    pub permission_timeout_ms: u64,
    /// Health/metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7080,
            capability_host: "127.0.0.1".to_string(),
            capability_port: 0,
            default_working_dir_base: "/var/lib/conduit/sessions".to_string(),
            capability_config_base_dir: "/var/lib/conduit/capability".to_string(),
            permission_timeout_ms: 30_000,
            health_port: 7081,
        }
    }
}

/// Child process spawning defaults (spec.md §4.2, §6.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Path to the assistant child binary.
    pub child_binary: String,
    /// Container runtime binary for container-mode spawns (spec.md §6.5).
    pub container_runtime: String,
    /// Tool name the child invokes to request permission out-of-band.
    pub capability_tool_name: String,
    /// Default allow-listed tool names, applied when a session doesn't
    /// override them.
    pub default_allowed_tools: Vec<String>,
    /// Default deny-listed tool names.
    pub default_disallowed_tools: Vec<String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            child_binary: "assistant".to_string(),
            container_runtime: "docker".to_string(),
            capability_tool_name: "request_permission".to_string(),
            default_allowed_tools: Vec::new(),
            default_disallowed_tools: Vec::new(),
        }
    }
}

/// Logging level, mirroring a `tracing` filter directive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to an `EnvFilter` directive string.
    #[must_use]
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging and metrics configuration (SPEC_FULL.md §1).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Minimum log level.
    pub level: LogLevel,
    /// Emit logs as JSON lines instead of human-readable text.
    pub json: bool,
    /// Whether to expose a Prometheus `/metrics` endpoint.
    pub metrics_enabled: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: LogLevel::Info, json: false, metrics_enabled: true }
    }
}
