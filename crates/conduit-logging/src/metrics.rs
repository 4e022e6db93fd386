//! Prometheus metrics recorder and `/metrics` endpoint handler.
//!
//! Grounded on the teacher's `tron-server::metrics`: install a global
//! recorder once at daemon startup, render it for the HTTP `/metrics` route,
//! and expose metric-name constants so call sites across crates can't typo
//! a label. This is the orchestrator's own request/session metrics surface,
//! distinct from (and not excluded by) the usage-scraping Non-goal.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Must be called
/// once at daemon startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Intent requests total (counter, labels: intent).
pub const INTENT_REQUESTS_TOTAL: &str = "intent_requests_total";
/// Intent errors total (counter, labels: intent, error_kind).
pub const INTENT_ERRORS_TOTAL: &str = "intent_errors_total";
/// Intent handling duration seconds (histogram, labels: intent).
pub const INTENT_DURATION_SECONDS: &str = "intent_duration_seconds";
/// Client connections opened total (counter).
pub const CONNECTIONS_TOTAL: &str = "connections_total";
/// Active client connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "connections_active";
/// Active sessions, durable and ephemeral combined (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Child process starts total (counter, labels: spawn_mode).
pub const RUNNER_STARTS_TOTAL: &str = "runner_starts_total";
/// Child process exits total (counter, labels: outcome).
pub const RUNNER_EXITS_TOTAL: &str = "runner_exits_total";
/// Permission requests total (counter).
pub const PERMISSION_REQUESTS_TOTAL: &str = "permission_requests_total";
/// Permission requests resolved by timeout or disconnect (counter, labels: reason).
pub const PERMISSION_UNANSWERED_TOTAL: &str = "permission_unanswered_total";
/// Permission round-trip duration seconds (histogram).
pub const PERMISSION_DURATION_SECONDS: &str = "permission_duration_seconds";
/// Pending capability requests awaiting a decision (gauge).
pub const CAPABILITY_PENDING: &str = "capability_pending";
