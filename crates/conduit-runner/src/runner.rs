//! The Runner: owns one child process and its `StreamProcessor`
//! (spec.md §4.2, §4.3).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use conduit_core::ids::ControlRequestId;
use conduit_core::permissions::PermissionMode;
use conduit_stream::StreamProcessor;
use parking_lot::Mutex as SyncMutex;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, instrument, warn};

use crate::child::ChildHandle;
use crate::errors::{Result, RunnerError};
use crate::events::RunnerEvent;
use crate::options::{build_command, StartOptions};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Owns one child process and its [`StreamProcessor`]. A `Runner` is
/// spawned, fed user turns and control requests, and torn down by its
/// owner (`conduit-manager`'s `RunnerManager`, which enforces the
/// at-most-one-active-runner-per-session invariant — spec.md §3 I1).
pub struct Runner {
    session_id: String,
    child: Mutex<Option<ChildHandle>>,
    processor: SyncMutex<StreamProcessor>,
    running: AtomicBool,
    events_tx: broadcast::Sender<RunnerEvent>,
    in_flight_control: SyncMutex<HashSet<ControlRequestId>>,
}

impl Runner {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            session_id: session_id.into(),
            child: Mutex::new(None),
            processor: SyncMutex::new(StreamProcessor::new()),
            running: AtomicBool::new(false),
            events_tx,
            in_flight_control: SyncMutex::new(HashSet::new()),
        })
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Subscribe to this runner's lifecycle and decomposed-stream events.
    /// Any number of observers may subscribe concurrently.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events_tx.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn permission_mode(&self) -> Option<PermissionMode> {
        self.processor.lock().permission_mode()
    }

    /// `start(initialPrompt, options)` (spec.md §4.2): spawn the child
    /// per `options.spawn_mode` and send the first user turn.
    #[instrument(skip(self, opts), fields(session_id = %self.session_id))]
    pub async fn start(self: &Arc<Self>, initial_prompt: &str, opts: StartOptions) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunnerError::AlreadyRunning);
        }

        let command = match build_command(&opts) {
            Ok(c) => c,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let handle = match ChildHandle::spawn(&command) {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        *self.child.lock().await = Some(handle);
        let _ = self.events_tx.send(RunnerEvent::Started);
        info!("runner child started");

        self.clone().spawn_reader_task();
        self.send_user_message(initial_prompt).await
    }

    fn spawn_reader_task(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let chunk = {
                    let mut guard = self.child.lock().await;
                    match guard.as_mut() {
                        Some(handle) => handle.read_chunk().await,
                        None => break,
                    }
                };
                match chunk {
                    Ok(Some(bytes)) => {
                        let events = self.processor.lock().process_chunk(&bytes);
                        for event in events {
                            if let conduit_stream::StreamEvent::ControlResponse { request_id: Some(id), .. } = &event {
                                self.in_flight_control.lock().remove(&ControlRequestId::from_string(id.clone()));
                            }
                            let _ = self.events_tx.send(RunnerEvent::Processor(event));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "runner read error");
                        break;
                    }
                }
            }

            self.processor.lock().flush();

            let exit = {
                let mut guard = self.child.lock().await;
                match guard.as_mut() {
                    Some(handle) => handle.wait().await.ok(),
                    None => None,
                }
            };
            *self.child.lock().await = None;
            self.running.store(false, Ordering::SeqCst);

            let (code, signal) = exit.map_or((None, None), |e| (e.code, e.signal));
            let _ = self.events_tx.send(RunnerEvent::Exit { code, signal });
            info!(session_id = %self.session_id, ?code, ?signal, "runner child exited");
        });
    }

    async fn write_frame(&self, frame: &str) -> Result<()> {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(handle) => handle.write_frame(frame.to_owned()).await,
            None => Err(RunnerError::NotRunning),
        }
    }

    /// `sendUserMessage(text)` (spec.md §4.2).
    pub async fn send_user_message(&self, text: &str) -> Result<()> {
        let frame = serde_json::json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{ "type": "text", "text": text }],
            },
        });
        self.write_frame(&frame.to_string()).await
    }

    /// `sendToolResult(tool_use_id, content, is_error)`: answer a tool
    /// call in-band, e.g. completing an `AskUserQuestion` turn from a
    /// client's `question_response` (spec.md §4.7).
    pub async fn send_tool_result(&self, tool_use_id: &str, content: Value, is_error: bool) -> Result<()> {
        let frame = serde_json::json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                }],
            },
        });
        self.write_frame(&frame.to_string()).await
    }

    /// `sendControlRequest(subtype, params)` (spec.md §4.3): write a
    /// `control_request` frame and return its id for correlation with
    /// the eventual `control_response`. Never blocks on the reply.
    pub async fn send_control_request(&self, subtype: &str, params: Value) -> Result<ControlRequestId> {
        let request_id = ControlRequestId::new();
        let mut request = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        request.insert("subtype".into(), Value::String(subtype.to_owned()));

        let frame = serde_json::json!({
            "type": "control_request",
            "request_id": request_id.as_str(),
            "request": Value::Object(request),
        });

        self.in_flight_control.lock().insert(request_id.clone());
        if let Err(e) = self.write_frame(&frame.to_string()).await {
            self.in_flight_control.lock().remove(&request_id);
            return Err(e);
        }
        Ok(request_id)
    }

    /// `requestPermissionModeChange(mode)` (spec.md §4.3): a no-op that
    /// returns `false` if the runner already reports `mode`, otherwise
    /// issues the control request and returns `true`. The actual
    /// transition is only applied when the child confirms — via either
    /// a `control_response` or a `system` echo, whichever arrives first
    /// (spec.md §9 open question, resolved: either confirms).
    pub async fn request_permission_mode_change(&self, mode: PermissionMode) -> Result<bool> {
        if self.permission_mode() == Some(mode) {
            return Ok(false);
        }
        self.send_control_request("set_permission_mode", serde_json::json!({ "mode": mode.as_str() }))
            .await?;
        Ok(true)
    }

    /// `sendInput(raw)`: raw byte passthrough to the child's stdin, used
    /// for PTY-mode interactive continuation. No framing is applied.
    pub async fn send_input(&self, raw: &[u8]) -> Result<()> {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(handle) => handle.write_raw(raw.to_vec()).await,
            None => Err(RunnerError::NotRunning),
        }
    }

    /// `stop()` (spec.md §4.2): idempotent — stopping an already-stopped
    /// runner is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(handle) => handle.start_kill(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_runner_is_not_running() {
        let runner = Runner::new("sess-1");
        assert!(!runner.is_running());
        assert_eq!(runner.permission_mode(), None);
    }

    #[tokio::test]
    async fn operations_on_unstarted_runner_return_not_running() {
        let runner = Runner::new("sess-1");
        let err = runner.send_user_message("hi").await.unwrap_err();
        assert!(matches!(err, RunnerError::NotRunning));
    }

    #[tokio::test]
    async fn stop_on_unstarted_runner_is_a_noop() {
        let runner = Runner::new("sess-1");
        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn permission_mode_change_is_noop_when_already_at_target() {
        let runner = Runner::new("sess-1");
        // permission_mode() is None until a system/init envelope sets it,
        // so requesting None-equivalent is never a no-op here; this test
        // only exercises the comparison path compiling and running.
        assert!(runner.permission_mode() != Some(PermissionMode::Plan));
    }
}
