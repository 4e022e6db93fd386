//! The CapabilityServer itself (spec.md §4.6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_core::ids::PermissionRequestId;
use conduit_logging::metrics::{
    CAPABILITY_PENDING, PERMISSION_DURATION_SECONDS, PERMISSION_REQUESTS_TOTAL, PERMISSION_UNANSWERED_TOTAL,
};
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::errors::{CapabilityError, Result};
use crate::protocol::{PermissionDecision, PermissionRequest, PermissionRequestFrame, PermissionResponseFrame};

/// Default wall-clock budget before a pending permission request is
/// resolved with a synthesized deny (spec.md §4.6 "Expiry & recovery").
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingRequest {
    session_id: String,
    connection_id: u64,
    reply_tx: mpsc::Sender<String>,
    started_at: Instant,
}

/// Why a pending permission request was resolved without a genuine
/// `permission_response` from the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionReason {
    /// No response arrived within [`CapabilityServer`]'s configured
    /// timeout.
    Timeout,
    /// The child connection closed before a response arrived.
    ChildDisconnected,
}

impl ResolutionReason {
    fn as_label(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ChildDisconnected => "disconnected",
        }
    }
}

/// Callbacks the CapabilityServer drives. Both run on the server's own
/// tokio tasks, so the Bridge-side implementation must not block.
pub trait CapabilityObserver: Send + Sync + 'static {
    /// A `permission_request` arrived from a child; route it to the
    /// session's attached client.
    fn on_request(&self, request: PermissionRequest);

    /// A pending request was resolved without a client response (spec.md
    /// §4.6 "Expiry & recovery"); the session should observe its status
    /// return to Idle and, for a timeout, an error event.
    fn on_unanswered(&self, session_id: &str, request_id: &PermissionRequestId, reason: ResolutionReason);
}

/// Loopback auxiliary server children dial back into to request tool
/// permission out-of-band from the main NDJSON stdio stream.
pub struct CapabilityServer<O: CapabilityObserver> {
    pending: DashMap<PermissionRequestId, PendingRequest>,
    observer: O,
    timeout: Duration,
    next_connection_id: std::sync::atomic::AtomicU64,
}

impl<O: CapabilityObserver> CapabilityServer<O> {
    #[must_use]
    pub fn new(observer: O) -> Arc<Self> {
        Self::with_timeout(observer, DEFAULT_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(observer: O, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            observer,
            timeout,
            next_connection_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Bind the loopback listener and spawn its accept loop in the
    /// background, returning the address the Runner's config file should
    /// advertise.
    pub async fn serve(self: &Arc<Self>, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await.map_err(CapabilityError::Bind)?;
        let local_addr = listener.local_addr().map_err(CapabilityError::Bind)?;
        let this = Arc::clone(self);
        tokio::spawn(async move { this.accept_loop(listener).await });
        Ok(local_addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "capability connection accepted");
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.handle_connection(stream).await });
                }
                Err(e) => {
                    warn!(error = %e, "capability accept failed");
                }
            }
        }
    }

    #[instrument(skip(self, stream))]
    async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let connection_id = self.next_connection_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let (read_half, mut write_half) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<String>(32);

        let writer_task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if write_half.write_all(b"\n").await.is_err() {
                    break;
                }
                let _ = write_half.flush().await;
            }
        });

        let mut lines = BufReader::new(read_half).lines();
        let mut bound_session: Option<String> = None;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Ok(frame) = serde_json::from_str::<PermissionRequestFrame>(&line) else {
                        warn!("malformed capability frame dropped");
                        continue;
                    };
                    if frame.frame_type != "permission_request" {
                        continue;
                    }
                    bound_session = Some(frame.session_id.clone());
                    self.register_pending(&frame, connection_id, tx.clone());
                    self.observer.on_request(frame.into());
                }
                Ok(None) | Err(_) => break,
            }
        }

        self.resolve_for_connection(connection_id, ResolutionReason::ChildDisconnected);
        let _ = bound_session;
        writer_task.abort();
    }

    fn register_pending(self: &Arc<Self>, frame: &PermissionRequestFrame, connection_id: u64, reply_tx: mpsc::Sender<String>) {
        self.pending.insert(
            frame.request_id.clone(),
            PendingRequest { session_id: frame.session_id.clone(), connection_id, reply_tx, started_at: Instant::now() },
        );
        metrics::counter!(PERMISSION_REQUESTS_TOTAL).increment(1);
        metrics::gauge!(CAPABILITY_PENDING).increment(1.0);

        let this = Arc::clone(self);
        let request_id = frame.request_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.timeout).await;
            this.resolve_timeout(&request_id);
        });
    }

    fn resolve_timeout(&self, request_id: &PermissionRequestId) {
        let Some((_, entry)) = self.pending.remove(request_id) else {
            return; // already answered or already disconnected
        };
        Self::record_resolution(&entry, ResolutionReason::Timeout);
        let frame = PermissionResponseFrame::new(
            entry.session_id.clone(),
            request_id.clone(),
            PermissionDecision::synthesized_deny("permission request timed out"),
        );
        if let Ok(json) = serde_json::to_string(&frame) {
            let _ = entry.reply_tx.try_send(json);
        }
        self.observer.on_unanswered(&entry.session_id, request_id, ResolutionReason::Timeout);
    }

    fn resolve_for_connection(&self, connection_id: u64, reason: ResolutionReason) {
        let stale: Vec<PermissionRequestId> = self
            .pending
            .iter()
            .filter(|e| e.value().connection_id == connection_id)
            .map(|e| e.key().clone())
            .collect();
        for request_id in stale {
            if let Some((_, entry)) = self.pending.remove(&request_id) {
                Self::record_resolution(&entry, reason);
                self.observer.on_unanswered(&entry.session_id, &request_id, reason);
            }
        }
    }

    /// Record the `CAPABILITY_PENDING`/`PERMISSION_DURATION_SECONDS`/
    /// `PERMISSION_UNANSWERED_TOTAL` metrics for a request leaving the
    /// pending table without a genuine client response.
    fn record_resolution(entry: &PendingRequest, reason: ResolutionReason) {
        metrics::gauge!(CAPABILITY_PENDING).decrement(1.0);
        metrics::histogram!(PERMISSION_DURATION_SECONDS).record(entry.started_at.elapsed().as_secs_f64());
        metrics::counter!(PERMISSION_UNANSWERED_TOTAL, "reason" => reason.as_label()).increment(1);
    }

    /// Deliver a client's `permission_response` to the child that is
    /// awaiting it. Returns an error if the request was already resolved
    /// (by timeout or disconnect) or was never seen.
    pub fn deliver_response(&self, request_id: &PermissionRequestId, decision: PermissionDecision) -> Result<()> {
        let Some((_, entry)) = self.pending.remove(request_id) else {
            return Err(CapabilityError::UnknownRequest(request_id.to_string()));
        };
        metrics::gauge!(CAPABILITY_PENDING).decrement(1.0);
        metrics::histogram!(PERMISSION_DURATION_SECONDS).record(entry.started_at.elapsed().as_secs_f64());
        let frame = PermissionResponseFrame::new(entry.session_id, request_id.clone(), decision);
        if let Ok(json) = serde_json::to_string(&frame) {
            let _ = entry.reply_tx.try_send(json);
        }
        Ok(())
    }

    /// Number of permission requests awaiting a client response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};
    use tokio::net::TcpStream;

    use super::*;

    #[derive(Default)]
    struct RecordingObserver {
        requests: Mutex<Vec<PermissionRequest>>,
        unanswered: Mutex<Vec<(String, PermissionRequestId, ResolutionReason)>>,
    }

    impl CapabilityObserver for Arc<RecordingObserver> {
        fn on_request(&self, request: PermissionRequest) {
            self.requests.lock().unwrap().push(request);
        }
        fn on_unanswered(&self, session_id: &str, request_id: &PermissionRequestId, reason: ResolutionReason) {
            self.unanswered
                .lock()
                .unwrap()
                .push((session_id.to_owned(), request_id.clone(), reason));
        }
    }

    async fn connect(addr: SocketAddr) -> TcpStream {
        TcpStream::connect(addr).await.unwrap()
    }

    #[tokio::test]
    async fn request_flows_to_observer_and_response_flows_back() {
        let observer = Arc::new(RecordingObserver::default());
        let server = CapabilityServer::new(observer.clone());
        let addr = server
            .serve(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();

        let mut stream = connect(addr).await;
        stream
            .write_all(b"{\"type\":\"permission_request\",\"sessionId\":\"s1\",\"requestId\":\"r1\",\"toolName\":\"Bash\",\"input\":{}}\n")
            .await
            .unwrap();

        for _ in 0..50 {
            if server.pending_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.pending_count(), 1);
        assert_eq!(observer.requests.lock().unwrap().len(), 1);

        server
            .deliver_response(
                &PermissionRequestId::from_string("r1".into()),
                PermissionDecision::Allow { updated_input: None, allow_for_session: None, tool_name: None },
            )
            .unwrap();
        assert_eq!(server.pending_count(), 0);

        let mut reader = TokioBufReader::new(&mut stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["response"]["behavior"], "allow");
    }

    #[tokio::test]
    async fn unanswered_request_after_timeout_is_synthesized_deny() {
        let observer = Arc::new(RecordingObserver::default());
        let server = CapabilityServer::with_timeout(observer.clone(), Duration::from_millis(30));
        let addr = server
            .serve(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();

        let mut stream = connect(addr).await;
        stream
            .write_all(b"{\"type\":\"permission_request\",\"sessionId\":\"s1\",\"requestId\":\"r1\",\"toolName\":\"Bash\",\"input\":{}}\n")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(server.pending_count(), 0);
        let unanswered = observer.unanswered.lock().unwrap();
        assert_eq!(unanswered.len(), 1);
        assert_eq!(unanswered[0].2, ResolutionReason::Timeout);
    }

    #[tokio::test]
    async fn deliver_response_to_unknown_request_errors() {
        let observer = Arc::new(RecordingObserver::default());
        let server = CapabilityServer::new(observer);
        let err = server
            .deliver_response(&PermissionRequestId::from_string("nope".into()), PermissionDecision::synthesized_deny("x"))
            .unwrap_err();
        assert!(matches!(err, CapabilityError::UnknownRequest(_)));
    }

    #[tokio::test]
    async fn disconnecting_before_response_resolves_as_denied() {
        let observer = Arc::new(RecordingObserver::default());
        let server = CapabilityServer::with_timeout(observer.clone(), Duration::from_secs(30));
        let addr = server
            .serve(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();

        let mut stream = connect(addr).await;
        stream
            .write_all(b"{\"type\":\"permission_request\",\"sessionId\":\"s1\",\"requestId\":\"r1\",\"toolName\":\"Bash\",\"input\":{}}\n")
            .await
            .unwrap();
        for _ in 0..50 {
            if server.pending_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(stream);

        for _ in 0..50 {
            if server.pending_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.pending_count(), 0);
        let unanswered = observer.unanswered.lock().unwrap();
        assert_eq!(unanswered[0].2, ResolutionReason::ChildDisconnected);
    }
}
