//! Client connection state and registry, adapted from the teacher's
//! WebSocket connection/broadcast pattern
//! (`tron-server/src/websocket/{connection,broadcast}.rs`) to a
//! transport-agnostic socket: `conduit-bridge` doesn't care whether the
//! caller framed the connection over a `WebSocket` or a raw TCP stream, so
//! unlike the teacher's `ClientConnection` this type carries no
//! `session_id` binding of its own — directed routing is the Bridge's
//! `session_listeners` map (spec.md §4.7), not a property of the
//! connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_core::ids::ConnectionId;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::OutboundMessage;

/// A single connected client (spec.md §4.7 "allClients").
pub struct ClientConnection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    #[must_use]
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Send a pre-serialized frame. Returns `false` if the channel is full
    /// or closed, incrementing the dropped-message counter.
    pub fn send_raw(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize `message` and send it.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send_raw(Arc::new(json)),
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound message");
                false
            }
        }
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    #[must_use]
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// Tracks every live client connection (spec.md §4.7 "allClients").
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection: Arc<ClientConnection>) {
        self.connections.insert(connection.id.clone(), connection);
    }

    pub fn remove(&self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Broadcast a message to every connected client (spec.md §6.2
    /// `global_usage`).
    pub fn broadcast_all(&self, message: &OutboundMessage) {
        let Ok(json) = serde_json::to_string(message) else {
            warn!("failed to serialize broadcast message");
            return;
        };
        let payload = Arc::new(json);
        for entry in &self.connections {
            if !entry.value().send_raw(Arc::clone(&payload)) {
                warn!(conn_id = %entry.key(), "failed to deliver broadcast to client");
            }
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(ClientConnection::new(ConnectionId::new(), tx)), rx)
    }

    #[tokio::test]
    async fn send_delivers_serialized_message() {
        let (conn, mut rx) = make_connection();
        let sent = conn.send(&OutboundMessage::Pong);
        assert!(sent);
        let raw = rx.recv().await.unwrap();
        assert!(raw.contains("pong"));
    }

    #[tokio::test]
    async fn send_to_closed_channel_increments_dropped_count() {
        let (tx, rx) = mpsc::channel(8);
        let conn = ClientConnection::new(ConnectionId::new(), tx);
        drop(rx);
        assert!(!conn.send(&OutboundMessage::Pong));
        assert_eq!(conn.dropped_count(), 1);
    }

    #[tokio::test]
    async fn registry_broadcasts_to_all_connections() {
        let registry = ConnectionRegistry::new();
        let (c1, mut rx1) = make_connection();
        let (c2, mut rx2) = make_connection();
        registry.add(Arc::clone(&c1));
        registry.add(Arc::clone(&c2));
        assert_eq!(registry.count(), 2);

        registry.broadcast_all(&OutboundMessage::GlobalUsage { total_tokens: 10, active_sessions: 1 });
        assert!(rx1.recv().await.unwrap().contains("global_usage"));
        assert!(rx2.recv().await.unwrap().contains("global_usage"));
    }

    #[test]
    fn registry_remove_drops_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = make_connection();
        let id = conn.id.clone();
        registry.add(conn);
        registry.remove(&id);
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_connection();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }
}
