//! WebSocket session lifecycle — handles a single connected client from
//! upgrade through disconnect, grounded on the teacher's
//! `tron-server::websocket::session::run_ws_session`, with liveness
//! monitoring adapted from the teacher's `websocket::heartbeat::run_heartbeat`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use conduit_bridge::{Bridge, Intent, OutboundMessage};
use conduit_core::errors::{CoreError, ErrorBody};
use conduit_logging::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL};
use futures::{SinkExt, StreamExt};
use tracing::warn;

/// How often the session pings an idle connection to provoke a pong.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// How long a connection may go without a pong/ping/text frame before it is
/// considered dead and the session tears down.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection with the bridge
/// 2. Dispatches incoming text frames as client intents
/// 3. Forwards outbound events/replies via the send channel
/// 4. Pings the client on an interval and closes the session if it stops
///    responding (spec.md §4.7 connection liveness)
/// 5. Cleans up the connection on disconnect
pub async fn run_ws_session(ws: WebSocket, bridge: Arc<Bridge>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (connection, mut send_rx) = bridge.register_connection();
    let connection_id = connection.id.clone();
    metrics::counter!(CONNECTIONS_TOTAL).increment(1);
    metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    'session: loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break 'session; };
                match msg {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<Intent>(&text) {
                            Ok(intent) => match bridge.handle_intent(connection_id.clone(), intent).await {
                                Ok(reply) => reply,
                                Err(e) => OutboundMessage::Error {
                                    session_id: None,
                                    error: ErrorBody::from(&CoreError::from(&e)),
                                },
                            },
                            Err(e) => OutboundMessage::Error {
                                session_id: None,
                                error: ErrorBody { kind: "invalid_request".into(), message: e.to_string() },
                            },
                        };
                        connection.send(&reply);
                    }
                    Message::Close(_) => break 'session,
                    Message::Ping(_) | Message::Pong(_) => connection.mark_alive(),
                    Message::Binary(_) => {
                        warn!(conn_id = %connection_id, "binary frames are not supported");
                    }
                }
            }
            msg = send_rx.recv() => {
                let Some(msg) = msg else { break 'session; };
                if ws_tx.send(Message::Text((*msg).clone().into())).await.is_err() {
                    break 'session;
                }
            }
            _ = heartbeat.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > HEARTBEAT_TIMEOUT {
                    warn!(
                        conn_id = %connection_id,
                        elapsed_secs = connection.last_pong_elapsed().as_secs(),
                        "connection missed heartbeat, closing"
                    );
                    break 'session;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break 'session;
                }
            }
        }
    }

    bridge.remove_connection(&connection_id);
    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}
