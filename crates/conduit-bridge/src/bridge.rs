//! The Bridge (spec.md §4.7): client socket protocol, session-listener
//! routing, turn-buffer accumulation, outbound event translation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use conduit_capability::{
    CapabilityObserver, CapabilityServer, PermissionRequest, ResolutionReason,
};
use conduit_core::content::{QuestionOptions, ToolResultContent};
use conduit_core::errors::ErrorBody;
use conduit_core::ids::{ConnectionId, PermissionRequestId, SessionId};
use conduit_core::messages::MessageItem;
use conduit_core::permissions::PermissionMode;
use conduit_core::session::SessionStatus;
use conduit_logging::metrics::{INTENT_DURATION_SECONDS, INTENT_ERRORS_TOTAL, INTENT_REQUESTS_TOTAL};
use conduit_manager::RunnerManager;
use conduit_runner::{RunnerEvent, SpawnMode, StartOptions};
use conduit_store::SessionStore;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::connection::{ClientConnection, ConnectionRegistry};
use crate::errors::{BridgeError, Result};
use crate::protocol::{Intent, OutboundMessage};
use crate::turn_buffer::TurnBuffer;

/// Static configuration the Bridge needs to start a Runner (eventually
/// supplied by `conduit-settings`; a plain struct for now so this crate has
/// no circular dependency on the settings layer).
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Path to the assistant child binary.
    pub child_binary: String,
    /// Base directory new sessions' working directories are created under
    /// (spec.md §6.4).
    pub base_working_dir: PathBuf,
    /// Base directory ephemeral capability-config files are written to.
    pub capability_base_dir: PathBuf,
    /// Loopback address the CapabilityServer binds.
    pub capability_bind_addr: SocketAddr,
    /// Tool name the child invokes to request permission out-of-band.
    pub capability_tool_name: String,
    /// Whether to mediate tool permission through the CapabilityServer at
    /// all (some deployments run fully auto-accept).
    pub permission_mediation: bool,
}

struct BridgeObserver {
    bridge: Weak<Bridge>,
}

impl CapabilityObserver for BridgeObserver {
    fn on_request(&self, request: PermissionRequest) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.handle_permission_request(request);
        }
    }

    fn on_unanswered(&self, session_id: &str, request_id: &PermissionRequestId, reason: ResolutionReason) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.handle_unanswered_permission(session_id, request_id, reason);
        }
    }
}

/// Client socket endpoint wiring `SessionStore`, `RunnerManager`, and
/// `CapabilityServer` together (spec.md §4.7).
pub struct Bridge {
    store: Arc<SessionStore>,
    runners: RunnerManager,
    capability: Arc<CapabilityServer<BridgeObserver>>,
    connections: ConnectionRegistry,
    /// Most-recent client connection that ran a turn on each session
    /// (spec.md §4.7 "sessionListeners").
    session_listeners: DashMap<String, ConnectionId>,
    /// Accumulated, not-yet-flushed text/thinking per session.
    turn_buffers: DashMap<String, TurnBuffer>,
    /// requestId -> sessionId, for validating a client's `permission_response`
    /// before routing it through the CapabilityServer (spec.md §4.7
    /// "pendingPermissionRequests"; the connection the reply must reach is
    /// tracked internally by the CapabilityServer itself).
    pending_permission_requests: DashMap<PermissionRequestId, String>,
    /// sessionId -> path of its ephemeral capability-config file, so it can
    /// be removed on exit.
    capability_config_paths: DashMap<String, PathBuf>,
    /// sessionId -> whether the current run resumed an upstream session that
    /// already had history outside our log, so a `ToolResult` with no prior
    /// `ToolUse` in this session is a dangling reference admitted during
    /// recovery rather than a protocol violation (spec.md §3).
    recovering_sessions: DashMap<String, bool>,
    capability_bound_addr: SyncMutex<Option<SocketAddr>>,
    config: BridgeConfig,
}

impl Bridge {
    #[must_use]
    pub fn new(store: Arc<SessionStore>, config: BridgeConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let observer = BridgeObserver { bridge: weak.clone() };
            Self {
                store,
                runners: RunnerManager::new(),
                capability: CapabilityServer::new(observer),
                connections: ConnectionRegistry::new(),
                session_listeners: DashMap::new(),
                turn_buffers: DashMap::new(),
                pending_permission_requests: DashMap::new(),
                capability_config_paths: DashMap::new(),
                recovering_sessions: DashMap::new(),
                capability_bound_addr: SyncMutex::new(None),
                config,
            }
        })
    }

    /// Bind and start the loopback CapabilityServer. Must be called once at
    /// daemon startup before any session requests tool permission.
    pub async fn start_capability_server(&self) -> Result<SocketAddr> {
        let addr = self.capability.serve(self.config.capability_bind_addr).await?;
        *self.capability_bound_addr.lock() = Some(addr);
        Ok(addr)
    }

    /// Register a new client connection, returning its id and the receiver
    /// end the transport layer should drain and write to the socket.
    pub fn register_connection(&self) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(64);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
        self.connections.add(Arc::clone(&conn));
        (conn, rx)
    }

    pub fn remove_connection(&self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }

    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.runners.active_count()
    }

    /// Dispatch one inbound client intent (spec.md §4.7).
    #[instrument(skip(self, intent), fields(from = %from))]
    pub async fn handle_intent(self: &Arc<Self>, from: ConnectionId, intent: Intent) -> Result<OutboundMessage> {
        let kind = intent.kind();
        let start = std::time::Instant::now();
        metrics::counter!(INTENT_REQUESTS_TOTAL, "intent" => kind).increment(1);
        let result = self.dispatch_intent(from, intent).await;
        metrics::histogram!(INTENT_DURATION_SECONDS, "intent" => kind).record(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            let error_kind = conduit_core::CoreError::from(e).kind();
            metrics::counter!(INTENT_ERRORS_TOTAL, "intent" => kind, "error_kind" => error_kind).increment(1);
        }
        result
    }

    async fn dispatch_intent(self: &Arc<Self>, from: ConnectionId, intent: Intent) -> Result<OutboundMessage> {
        match intent {
            Intent::ListSessions => Ok(OutboundMessage::SessionList { sessions: self.store.list_sessions()? }),
            Intent::CreateSession { name, working_dir } => self.handle_create_session(name, working_dir),
            Intent::AttachSession { session_id } => self.handle_attach_session(from, &session_id),
            Intent::DeleteSession { session_id } => self.handle_delete_session(&session_id).await,
            Intent::RenameSession { session_id, name } => self.handle_rename_session(&session_id, name),
            Intent::SetPermissionMode { session_id, mode } => {
                self.handle_set_permission_mode(&session_id, &mode).await
            }
            Intent::SetModel { session_id, model } => self.handle_set_model(&session_id, model),
            Intent::UserMessage { session_id, content, images } => {
                self.handle_user_message(from, &session_id, content, images).await
            }
            Intent::Interrupt { session_id } => self.handle_interrupt(&session_id).await,
            Intent::PermissionResponse { session_id, request_id, response } => {
                self.handle_permission_response(&session_id, &PermissionRequestId::from_string(request_id), response.into())
            }
            Intent::QuestionResponse { session_id, request_id, answers } => {
                self.handle_question_response(&session_id, &request_id, answers).await
            }
            Intent::CompactSession { session_id } => self.handle_compact_session(&session_id),
            Intent::GetHistory { session_id } => Ok(OutboundMessage::History {
                history: self.store.get_history(&SessionId::from_string(session_id.clone()))?,
                session_id,
            }),
            Intent::ListBindings => Ok(OutboundMessage::Bindings { bindings: self.store.list_bindings()? }),
            Intent::Ping => Ok(OutboundMessage::Pong),
        }
    }

    fn handle_create_session(&self, name: Option<String>, working_dir: Option<String>) -> Result<OutboundMessage> {
        let working_dir = working_dir.unwrap_or_else(|| {
            let dir = self.config.base_working_dir.join(uuid::Uuid::now_v7().to_string());
            dir.to_string_lossy().into_owned()
        });
        let _ = std::fs::create_dir_all(&working_dir);
        let session = self.store.create_session(name, working_dir)?;
        Ok(OutboundMessage::SessionAttached { history: Vec::new(), session })
    }

    fn handle_attach_session(self: &Arc<Self>, from: ConnectionId, session_id: &str) -> Result<OutboundMessage> {
        let id = SessionId::from_string(session_id.to_owned());
        let session = self.store.get_session(&id)?.ok_or_else(|| {
            BridgeError::from(conduit_store::StoreError::SessionNotFound(session_id.to_owned()))
        })?;
        let history = self.store.get_history(&id)?;
        self.session_listeners.insert(session_id.to_owned(), from);
        Ok(OutboundMessage::SessionAttached { session, history })
    }

    async fn handle_delete_session(&self, session_id: &str) -> Result<OutboundMessage> {
        self.runners.stop_session(session_id).await?;
        self.store.delete_session(&SessionId::from_string(session_id.to_owned()))?;
        self.session_listeners.remove(session_id);
        self.turn_buffers.remove(session_id);
        Ok(OutboundMessage::Ack { session_id: Some(session_id.to_owned()) })
    }

    fn handle_rename_session(&self, session_id: &str, name: String) -> Result<OutboundMessage> {
        self.store.rename_session(&SessionId::from_string(session_id.to_owned()), name)?;
        Ok(OutboundMessage::Ack { session_id: Some(session_id.to_owned()) })
    }

    async fn handle_set_permission_mode(&self, session_id: &str, mode: &str) -> Result<OutboundMessage> {
        let mode = PermissionMode::parse(mode)
            .ok_or_else(|| BridgeError::InvalidRequest(format!("unknown permission mode: {mode}")))?;
        let id = SessionId::from_string(session_id.to_owned());
        self.store.set_permission_mode(&id, mode)?;
        if let Some(runner) = self.runners.get_runner(session_id) {
            runner.request_permission_mode_change(mode).await?;
        }
        Ok(OutboundMessage::Ack { session_id: Some(session_id.to_owned()) })
    }

    fn handle_set_model(&self, session_id: &str, model: String) -> Result<OutboundMessage> {
        self.store.set_model(&SessionId::from_string(session_id.to_owned()), model)?;
        Ok(OutboundMessage::Ack { session_id: Some(session_id.to_owned()) })
    }

    async fn handle_user_message(
        self: &Arc<Self>,
        from: ConnectionId,
        session_id: &str,
        content: String,
        images: Vec<conduit_core::content::ImageRef>,
    ) -> Result<OutboundMessage> {
        let id = SessionId::from_string(session_id.to_owned());
        self.session_listeners.insert(session_id.to_owned(), from);
        self.store.add_to_history(&id, MessageItem::User { text: content.clone(), images })?;

        if let Some(runner) = self.runners.get_runner(session_id) {
            runner.send_user_message(&content).await?;
        } else {
            self.start_runner(session_id, &content).await?;
        }
        self.store.update_session_status(&id, SessionStatus::Running)?;
        Ok(OutboundMessage::Ack { session_id: Some(session_id.to_owned()) })
    }

    async fn start_runner(self: &Arc<Self>, session_id: &str, initial_prompt: &str) -> Result<()> {
        let id = SessionId::from_string(session_id.to_owned());
        let session = self
            .store
            .get_session(&id)?
            .ok_or_else(|| BridgeError::from(conduit_store::StoreError::SessionNotFound(session_id.to_owned())))?;

        self.recovering_sessions.insert(session_id.to_owned(), session.upstream_session_id.is_some());

        let mut capability_config_path = None;
        let mut capability_tool_name = None;
        if self.config.permission_mediation {
            if let Some(addr) = *self.capability_bound_addr.lock() {
                let path =
                    conduit_capability::write_config_file(&self.config.capability_base_dir, session_id, addr)?;
                capability_tool_name = Some(self.config.capability_tool_name.clone());
                self.capability_config_paths.insert(session_id.to_owned(), path.clone());
                capability_config_path = Some(path.to_string_lossy().into_owned());
            }
        }

        let options = StartOptions {
            child_binary: self.config.child_binary.clone(),
            working_dir: session.working_dir.clone(),
            upstream_session_id: session.upstream_session_id.as_ref().map(ToString::to_string),
            permission_mode: Some(session.permission_mode),
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            capability_config_path,
            capability_tool_name,
            extended_thinking: false,
            image_attachments: Vec::new(),
            bind_mounts: Vec::new(),
            env: HashMap::new(),
            spawn_mode: SpawnMode::Direct,
        };

        let bridge = Arc::clone(self);
        let session_id = session_id.to_owned();
        self.runners
            .start_session(session_id.clone(), initial_prompt, options, move |event| {
                bridge.handle_runner_event(&session_id, event);
            })
            .await?;
        Ok(())
    }

    async fn handle_interrupt(&self, session_id: &str) -> Result<OutboundMessage> {
        self.runners.stop_session(session_id).await?;
        Ok(OutboundMessage::Ack { session_id: Some(session_id.to_owned()) })
    }

    fn handle_permission_response(
        &self,
        session_id: &str,
        request_id: &PermissionRequestId,
        decision: conduit_capability::PermissionDecision,
    ) -> Result<OutboundMessage> {
        let bound_session = self
            .pending_permission_requests
            .remove(request_id)
            .map(|(_, s)| s)
            .ok_or_else(|| BridgeError::UnknownRequest(request_id.to_string()))?;
        if bound_session != session_id {
            return Err(BridgeError::InvalidRequest(format!(
                "permission response session mismatch: expected {bound_session}, got {session_id}"
            )));
        }
        self.capability.deliver_response(request_id, decision)?;
        self.store
            .update_session_status(&SessionId::from_string(session_id.to_owned()), SessionStatus::Running)?;
        Ok(OutboundMessage::Ack { session_id: Some(session_id.to_owned()) })
    }

    async fn handle_question_response(
        &self,
        session_id: &str,
        request_id: &str,
        answers: serde_json::Value,
    ) -> Result<OutboundMessage> {
        let runner = self
            .runners
            .get_runner(session_id)
            .ok_or_else(|| BridgeError::InvalidRequest(format!("no running session: {session_id}")))?;
        runner.send_tool_result(request_id, answers, false).await?;
        self.store
            .update_session_status(&SessionId::from_string(session_id.to_owned()), SessionStatus::Running)?;
        Ok(OutboundMessage::Ack { session_id: Some(session_id.to_owned()) })
    }

    /// `compact_session` (spec.md §9 Open Question, resolved in DESIGN.md):
    /// refused while a Runner is live; otherwise appends a summary turn.
    /// History is append-only (spec.md §3), so this never rewrites or
    /// drops prior rows.
    fn handle_compact_session(&self, session_id: &str) -> Result<OutboundMessage> {
        if self.runners.has_running_session(session_id) {
            return Err(BridgeError::SessionBusy(session_id.to_owned()));
        }
        let id = SessionId::from_string(session_id.to_owned());
        let turn_count = self.store.get_history(&id)?.len();
        self.store.add_to_history(
            &id,
            MessageItem::Assistant { text: format!("[conversation compacted: {turn_count} prior entries]") },
        )?;
        Ok(OutboundMessage::Ack { session_id: Some(session_id.to_owned()) })
    }

    fn handle_permission_request(&self, request: PermissionRequest) {
        self.pending_permission_requests
            .insert(request.request_id.clone(), request.session_id.clone());
        let id = SessionId::from_string(request.session_id.clone());
        if let Err(e) = self.store.update_session_status(&id, SessionStatus::WaitingPermission) {
            warn!(session_id = %request.session_id, error = %e, "failed to update status to WaitingPermission");
        }
        self.emit(
            &request.session_id,
            OutboundMessage::PermissionRequest {
                session_id: request.session_id.clone(),
                request_id: request.request_id.to_string(),
                tool_name: request.tool_name,
                input: request.input,
            },
        );
    }

    fn handle_unanswered_permission(&self, session_id: &str, request_id: &PermissionRequestId, reason: ResolutionReason) {
        self.pending_permission_requests.remove(request_id);
        let id = SessionId::from_string(session_id.to_owned());
        // Timeout: the child is still alive and waiting, so the client
        // returns to Running. A disconnected child never answers, so the
        // session settles to Idle instead (spec.md §4.6 "Expiry & recovery").
        let restored_status = match reason {
            ResolutionReason::Timeout => SessionStatus::Running,
            ResolutionReason::ChildDisconnected => SessionStatus::Idle,
        };
        if let Err(e) = self.store.update_session_status(&id, restored_status) {
            warn!(session_id, error = %e, "failed to restore status after unanswered permission request");
        }
        if matches!(reason, ResolutionReason::Timeout) {
            self.emit(
                session_id,
                OutboundMessage::Error {
                    session_id: Some(session_id.to_owned()),
                    error: ErrorBody { kind: "PermissionTimeout".into(), message: "permission request timed out".into() },
                },
            );
        }
    }

    /// The RunnerManager event callback (spec.md §4.7 "Outbound event
    /// translation"): apply the event's SessionStore side-effect, then
    /// emit the corresponding client message.
    fn handle_runner_event(&self, session_id: &str, event: RunnerEvent) {
        let id = SessionId::from_string(session_id.to_owned());
        match event {
            RunnerEvent::Started => {
                if let Err(e) = self.store.update_session_status(&id, SessionStatus::Running) {
                    warn!(session_id, error = %e, "failed to mark session running");
                }
            }
            RunnerEvent::Processor(stream_event) => self.handle_stream_event(session_id, &id, stream_event),
            RunnerEvent::Exit { code, signal } => {
                debug!(session_id, ?code, ?signal, "runner exited");
                self.flush_turn_buffer(session_id, &id);
                let _ = self.store.update_session_status(&id, SessionStatus::Idle);
                if let Some((_, path)) = self.capability_config_paths.remove(session_id) {
                    let _ = conduit_capability::remove_config_file(&path);
                }
                self.recovering_sessions.remove(session_id);
            }
        }
    }

    fn handle_stream_event(&self, session_id: &str, id: &SessionId, event: conduit_stream::StreamEvent) {
        use conduit_stream::StreamEvent;
        match event {
            StreamEvent::System { upstream_session_id, model, cwd: _, permission_mode: _, tools } => {
                if let Some(uid) = &upstream_session_id {
                    let _ = self.store.set_upstream_session_id(id, uid.clone());
                }
                if let Some(m) = &model {
                    let _ = self.store.set_model(id, m.clone());
                }
                self.emit(
                    session_id,
                    OutboundMessage::SystemInfo {
                        session_id: session_id.to_owned(),
                        snapshot: conduit_core::content::SystemInfoSnapshot {
                            upstream_session_id,
                            model,
                            permission_mode: None,
                            cwd: None,
                            tools,
                        },
                    },
                );
            }
            StreamEvent::Text { text } => {
                self.turn_buffers.entry(session_id.to_owned()).or_default().push_text(&text);
                self.emit(session_id, OutboundMessage::TextOutput { session_id: session_id.to_owned(), text });
            }
            StreamEvent::Thinking { text } => {
                self.turn_buffers.entry(session_id.to_owned()).or_default().push_thinking(&text);
                self.emit(session_id, OutboundMessage::ThinkingOutput { session_id: session_id.to_owned(), text });
            }
            StreamEvent::ToolUse { tool_use_id, tool_name, input } => {
                if tool_name == "AskUserQuestion" {
                    let options = serde_json::from_value::<QuestionOptions>(input.clone())
                        .unwrap_or_else(|_| QuestionOptions { prompt: input.to_string(), options: Vec::new() });
                    let _ = self.store.add_to_history(
                        id,
                        MessageItem::Question { request_id: tool_use_id.clone(), options: options.clone() },
                    );
                    let _ = self.store.update_session_status(id, SessionStatus::WaitingInput);
                    self.emit(
                        session_id,
                        OutboundMessage::AskUserQuestion {
                            session_id: session_id.to_owned(),
                            request_id: tool_use_id,
                            options,
                        },
                    );
                } else {
                    let _ = self.store.add_to_history(
                        id,
                        MessageItem::ToolUse {
                            tool_use_id: tool_use_id.clone().into(),
                            tool_name: tool_name.clone(),
                            input: input.clone(),
                        },
                    );
                    self.emit(
                        session_id,
                        OutboundMessage::ToolUse { session_id: session_id.to_owned(), tool_use_id, tool_name, input },
                    );
                }
            }
            StreamEvent::ToolResult { tool_use_id, content, is_error } => {
                let allow_dangling =
                    self.recovering_sessions.get(session_id).map(|v| *v).unwrap_or(false);
                if let Ok(history) = self.store.get_history(id) {
                    let mut items: Vec<MessageItem> = history.into_iter().map(|row| row.item).collect();
                    items.push(MessageItem::ToolResult {
                        tool_use_id: tool_use_id.clone().into(),
                        content: ToolResultContent::Text(content.clone()),
                        is_error,
                    });
                    if let Some(dangling_id) =
                        conduit_core::messages::find_dangling_tool_result(&items, allow_dangling)
                    {
                        warn!(
                            session_id,
                            tool_use_id = %dangling_id,
                            "tool_result references a tool_use_id with no earlier tool_use in this session"
                        );
                    }
                }
                let _ = self.store.add_to_history(
                    id,
                    MessageItem::ToolResult {
                        tool_use_id: tool_use_id.clone().into(),
                        content: ToolResultContent::Text(content.clone()),
                        is_error,
                    },
                );
                self.emit(
                    session_id,
                    OutboundMessage::ToolResult { session_id: session_id.to_owned(), tool_use_id, content, is_error },
                );
            }
            StreamEvent::Usage { counters } => {
                let model = self
                    .store
                    .get_session(id)
                    .ok()
                    .flatten()
                    .and_then(|s| s.model)
                    .unwrap_or_else(|| "unknown".to_owned());
                let _ = self.store.add_usage(id, counters);
                let _ = self.store.add_model_usage(id, &model, counters);
                self.emit(session_id, OutboundMessage::UsageInfo { session_id: session_id.to_owned(), usage: counters });
            }
            StreamEvent::Result { final_text, upstream_session_id } => {
                if let Some(uid) = upstream_session_id {
                    let _ = self.store.set_upstream_session_id(id, uid);
                }
                self.flush_turn_buffer(session_id, id);
                let _ = self.store.update_session_status(id, SessionStatus::Idle);
                self.emit(session_id, OutboundMessage::Result { session_id: session_id.to_owned(), final_text });
            }
            StreamEvent::ControlResponse { .. } | StreamEvent::PermissionModeChanged { .. } => {
                // Internal state-machine confirmations only; no client-facing
                // message in the translation table (spec.md §4.7).
            }
        }
    }

    fn flush_turn_buffer(&self, session_id: &str, id: &SessionId) {
        let Some(mut entry) = self.turn_buffers.get_mut(session_id) else {
            return;
        };
        let flushed = entry.flush();
        if let Some(thinking) = flushed.thinking {
            let _ = self.store.add_to_history(id, MessageItem::Thinking { text: thinking });
        }
        if let Some(text) = flushed.text {
            let _ = self.store.add_to_history(id, MessageItem::Assistant { text });
        }
    }

    fn emit(&self, session_id: &str, message: OutboundMessage) {
        let Some(conn_id) = self.session_listeners.get(session_id).map(|e| e.clone()) else {
            return;
        };
        if let Some(conn) = self.connections.get(&conn_id) {
            if !conn.send(&message) {
                warn!(session_id, conn_id = %conn_id, "failed to deliver event to client");
            }
        }
    }

    /// Periodic telemetry broadcast (spec.md §6.2 `global_usage`).
    pub fn broadcast_global_usage(&self, total_tokens: u64) {
        self.connections.broadcast_all(&OutboundMessage::GlobalUsage {
            total_tokens,
            active_sessions: self.runners.active_count(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            child_binary: "cat".into(),
            base_working_dir: std::env::temp_dir(),
            capability_base_dir: std::env::temp_dir(),
            capability_bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            capability_tool_name: "request_permission".into(),
            permission_mediation: false,
        }
    }

    fn test_bridge() -> Arc<Bridge> {
        Bridge::new(Arc::new(SessionStore::open_in_memory().unwrap()), test_config())
    }

    #[tokio::test]
    async fn create_and_list_sessions() {
        let bridge = test_bridge();
        let (conn, _rx) = bridge.register_connection();
        bridge
            .handle_intent(conn.id.clone(), Intent::CreateSession { name: Some("s".into()), working_dir: None })
            .await
            .unwrap();
        let reply = bridge.handle_intent(conn.id.clone(), Intent::ListSessions).await.unwrap();
        assert!(matches!(reply, OutboundMessage::SessionList { sessions } if sessions.len() == 1));
    }

    #[tokio::test]
    async fn attach_unknown_session_errors() {
        let bridge = test_bridge();
        let (conn, _rx) = bridge.register_connection();
        let err = bridge
            .handle_intent(conn.id.clone(), Intent::AttachSession { session_id: "nope".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Store(conduit_store::StoreError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn attach_session_binds_listener_and_returns_history() {
        let bridge = test_bridge();
        let (conn, _rx) = bridge.register_connection();
        let reply = bridge
            .handle_intent(conn.id.clone(), Intent::CreateSession { name: Some("s".into()), working_dir: None })
            .await
            .unwrap();
        let OutboundMessage::SessionAttached { session, .. } = reply else { panic!("expected SessionAttached") };

        let reply = bridge
            .handle_intent(conn.id.clone(), Intent::AttachSession { session_id: session.id.to_string() })
            .await
            .unwrap();
        assert!(matches!(reply, OutboundMessage::SessionAttached { history, .. } if history.is_empty()));
    }

    #[tokio::test]
    async fn rename_and_get_history_round_trip() {
        let bridge = test_bridge();
        let (conn, _rx) = bridge.register_connection();
        let reply = bridge
            .handle_intent(conn.id.clone(), Intent::CreateSession { name: None, working_dir: None })
            .await
            .unwrap();
        let OutboundMessage::SessionAttached { session, .. } = reply else { panic!("expected SessionAttached") };

        bridge
            .handle_intent(conn.id.clone(), Intent::RenameSession { session_id: session.id.to_string(), name: "x".into() })
            .await
            .unwrap();

        let reply = bridge
            .handle_intent(conn.id.clone(), Intent::GetHistory { session_id: session.id.to_string() })
            .await
            .unwrap();
        assert!(matches!(reply, OutboundMessage::History { history, .. } if history.is_empty()));
    }

    #[tokio::test]
    async fn compacting_an_idle_session_appends_a_summary_turn() {
        let bridge = test_bridge();
        let (conn, _rx) = bridge.register_connection();
        let reply = bridge
            .handle_intent(conn.id.clone(), Intent::CreateSession { name: Some("s".into()), working_dir: None })
            .await
            .unwrap();
        let OutboundMessage::SessionAttached { session, .. } = reply else { panic!("expected SessionAttached") };

        bridge
            .handle_intent(conn.id.clone(), Intent::CompactSession { session_id: session.id.to_string() })
            .await
            .unwrap();
        let reply = bridge
            .handle_intent(conn.id.clone(), Intent::GetHistory { session_id: session.id.to_string() })
            .await
            .unwrap();
        assert!(matches!(reply, OutboundMessage::History { history, .. } if history.len() == 1));
    }

    #[tokio::test]
    async fn ping_replies_pong() {
        let bridge = test_bridge();
        let (conn, _rx) = bridge.register_connection();
        let reply = bridge.handle_intent(conn.id.clone(), Intent::Ping).await.unwrap();
        assert!(matches!(reply, OutboundMessage::Pong));
    }

    #[tokio::test]
    async fn list_bindings_starts_empty() {
        let bridge = test_bridge();
        let (conn, _rx) = bridge.register_connection();
        let reply = bridge.handle_intent(conn.id.clone(), Intent::ListBindings).await.unwrap();
        assert!(matches!(reply, OutboundMessage::Bindings { bindings } if bindings.is_empty()));
    }

    #[tokio::test]
    async fn permission_response_to_unknown_request_errors() {
        let bridge = test_bridge();
        let (conn, _rx) = bridge.register_connection();
        let err = bridge
            .handle_intent(
                conn.id.clone(),
                Intent::PermissionResponse {
                    session_id: "s1".into(),
                    request_id: "r1".into(),
                    response: crate::protocol::ClientPermissionDecision::Deny { message: None },
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownRequest(_)));
    }
}
