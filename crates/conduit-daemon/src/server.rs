//! The daemon's Axum HTTP server: `/health`, `/metrics`, `/ws` (SPEC_FULL.md
//! §6), grounded on the teacher's `tron-server::server::TronServer`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use conduit_bridge::Bridge;
use conduit_logging::metrics::SESSIONS_ACTIVE;
use conduit_store::SessionStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, instrument, warn};

use crate::config::DaemonConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::ws_session::run_ws_session;

#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        axum::http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

#[derive(Clone)]
struct AppState {
    bridge: Arc<Bridge>,
    store: Arc<SessionStore>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    config: DaemonConfig,
    metrics_handle: Arc<PrometheusHandle>,
}

/// The daemon's client-facing server: owns the `Bridge` and the Axum router.
pub struct DaemonServer {
    bridge: Arc<Bridge>,
    store: Arc<SessionStore>,
    shutdown: Arc<ShutdownCoordinator>,
    config: DaemonConfig,
    metrics_handle: Arc<PrometheusHandle>,
    start_time: Instant,
}

impl DaemonServer {
    #[must_use]
    pub fn new(
        bridge: Arc<Bridge>,
        store: Arc<SessionStore>,
        config: DaemonConfig,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        Self {
            bridge,
            store,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            config,
            metrics_handle: Arc::new(metrics_handle),
            start_time: Instant::now(),
        }
    }

    fn router(&self) -> Router {
        let state = AppState {
            bridge: self.bridge.clone(),
            store: self.store.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            config: self.config.clone(),
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_upgrade_handler))
            .with_state(state)
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(CompressionLayer::new())
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Bind to a TCP port and start serving. Returns the bound address and a
    /// join handle for the server task.
    #[instrument(skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "daemon server started");

        let router = self.router();
        let shutdown_token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.bridge.connection_count();
    let active_sessions = state.bridge.active_session_count();
    let store_reachable = state.store.list_sessions().is_ok();
    metrics::gauge!(SESSIONS_ACTIVE).set(active_sessions as f64);
    Json(health::health_check(state.start_time, connections, active_sessions, store_reachable))
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let current = state.bridge.connection_count();
    if current >= state.config.max_connections {
        warn!(current, max = state.config.max_connections, "connection limit reached, rejecting upgrade");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let bridge = state.bridge;
    Ok(ws
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, bridge)))
}
