//! # conduitd
//!
//! Conduit daemon binary — wires every crate into a running process: loads
//! layered settings, opens the durable store, builds the `Bridge`, starts
//! the capability server and the client-facing Axum server, and runs the
//! periodic ephemeral-session pruning and global-usage broadcast tasks.
//! Grounded on the teacher's `tron-agent/src/main.rs`.

#![deny(unsafe_code)]

mod config;
mod health;
mod server;
mod shutdown;
mod ws_session;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use conduit_bridge::{Bridge, BridgeConfig};
use conduit_store::SessionStore;

use crate::config::DaemonConfig;
use crate::server::DaemonServer;

/// Conduit daemon.
#[derive(Parser, Debug)]
#[command(name = "conduitd", about = "Conduit multi-session orchestrator daemon")]
struct Cli {
    /// Host to bind the client socket.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind the client socket (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database file. Overrides settings.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to the settings JSON file. Defaults to `~/.conduit/settings.json`.
    #[arg(long)]
    settings_path: Option<PathBuf>,
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display())),
        _ => Ok(()),
    }
}

/// Periodically reclaim stale ephemeral sessions (SPEC_FULL.md §4.5:
/// `prune_ephemeral_older_than`, invoked by `conduit-daemon`, never the Bridge).
fn spawn_ephemeral_pruner(store: Arc<SessionStore>, ttl: Duration, shutdown: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pruned = store.prune_ephemeral_older_than(ttl);
                    if pruned > 0 {
                        tracing::debug!(pruned, "reclaimed stale ephemeral sessions");
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
    });
}

/// Periodically broadcast aggregate token usage to every connected client
/// (spec.md §6.2 `global_usage`).
fn spawn_global_usage_broadcaster(
    bridge: Arc<Bridge>,
    store: Arc<SessionStore>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Ok(sessions) = store.list_sessions() {
                        let total_tokens: u64 = sessions.iter().map(|s| s.usage.total()).sum();
                        bridge.broadcast_global_usage(total_tokens);
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings_path.unwrap_or_else(conduit_settings::settings_path);
    let settings = conduit_settings::load_settings_from_path(&settings_path).unwrap_or_default();

    conduit_logging::init_subscriber(&settings.logging);
    let metrics_handle = conduit_logging::metrics::install_recorder();

    let db_path = args.db_path.unwrap_or_else(|| PathBuf::from(settings.store.database_path.clone()));
    ensure_parent_dir(&db_path)?;
    let store = Arc::new(
        SessionStore::open_file(db_path.to_string_lossy().as_ref())
            .context("failed to open session store")?,
    );

    let capability_bind_addr: SocketAddr =
        format!("{}:{}", settings.server.capability_host, settings.server.capability_port)
            .parse()
            .context("invalid capability bind address")?;

    let bridge_config = BridgeConfig {
        child_binary: settings.runner.child_binary.clone(),
        base_working_dir: PathBuf::from(&settings.server.default_working_dir_base),
        capability_base_dir: PathBuf::from(&settings.server.capability_config_base_dir),
        capability_bind_addr,
        capability_tool_name: settings.runner.capability_tool_name.clone(),
        permission_mediation: true,
    };
    std::fs::create_dir_all(&bridge_config.base_working_dir)
        .context("failed to create session working-directory base")?;
    std::fs::create_dir_all(&bridge_config.capability_base_dir)
        .context("failed to create capability config base directory")?;

    let bridge = Bridge::new(store.clone(), bridge_config);
    let capability_addr = bridge.start_capability_server().await.context("failed to start capability server")?;
    tracing::info!(addr = %capability_addr, "capability server listening");

    let mut daemon_config = DaemonConfig::from(&settings.server);
    if let Some(host) = args.host {
        daemon_config.host = host;
    }
    if let Some(port) = args.port {
        daemon_config.port = port;
    }

    let server = DaemonServer::new(bridge.clone(), store.clone(), daemon_config, metrics_handle);
    let shutdown_token = server.shutdown().token();

    let ephemeral_ttl = Duration::from_secs(settings.store.ephemeral_ttl_secs);
    spawn_ephemeral_pruner(store.clone(), ephemeral_ttl, shutdown_token.clone());
    spawn_global_usage_broadcaster(bridge, store, shutdown_token);

    let (addr, handle) = server.listen().await.context("failed to bind daemon server")?;
    tracing::info!(addr = %addr, "conduit daemon listening");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    server.shutdown().shutdown();
    let _ = handle.await;
    tracing::info!("shutdown complete");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_defaults_are_none() {
        let cli = Cli::parse_from(["conduitd"]);
        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["conduitd", "--port", "9090"]);
        assert_eq!(cli.port, Some(9090));
    }

    #[test]
    fn ensure_parent_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("test.db");
        ensure_parent_dir(&path).unwrap();
        assert!(path.parent().unwrap().exists());
    }
}
