//! `RunnerManager`: one logical active runner per session id
//! (spec.md §4.4).

use std::sync::Arc;

use conduit_logging::metrics::{RUNNER_EXITS_TOTAL, RUNNER_STARTS_TOTAL};
use conduit_runner::{Runner, RunnerEvent, StartOptions};
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::errors::{ManagerError, Result};

/// Maps session id to Runner, enforces at-most-one active runner per
/// session, and fans a single `on_event` callback out across a Runner's
/// full lifetime including a synthetic trailing `exit`.
///
/// `RunnerManager` itself never multicasts an event to more than one
/// listener — that discipline (spec.md §4.4) is the Bridge's job, which
/// subscribes its own fan-out on top of the callback this manager drives.
#[derive(Clone)]
pub struct RunnerManager {
    runners: Arc<DashMap<String, Arc<Runner>>>,
}

impl Default for RunnerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerManager {
    #[must_use]
    pub fn new() -> Self {
        Self { runners: Arc::new(DashMap::new()) }
    }

    /// `startSession(session_id, initial_prompt, options, onEvent)`
    /// (spec.md §4.4). Fails with `AlreadyActive` if a Runner for this
    /// session exists and is running.
    #[instrument(skip(self, options, on_event), fields(session_id = %session_id.as_ref()))]
    pub async fn start_session(
        &self,
        session_id: impl AsRef<str>,
        initial_prompt: &str,
        options: StartOptions,
        on_event: impl Fn(RunnerEvent) + Send + Sync + 'static,
    ) -> Result<()> {
        let session_id = session_id.as_ref().to_owned();

        if self.has_running_session(&session_id) {
            return Err(ManagerError::AlreadyActive(session_id));
        }

        let runner = Runner::new(session_id.clone());
        self.runners.insert(session_id.clone(), Arc::clone(&runner));

        let spawn_mode_label = format!("{:?}", options.spawn_mode).to_lowercase();

        let mut events = runner.subscribe();
        let runners = Arc::clone(&self.runners);
        let fan_out_session_id = session_id.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let is_exit = matches!(&event, RunnerEvent::Exit { .. });
                if let RunnerEvent::Exit { code, signal } = &event {
                    let outcome = if signal.is_some() {
                        "signaled"
                    } else if *code == Some(0) {
                        "success"
                    } else {
                        "failure"
                    };
                    metrics::counter!(RUNNER_EXITS_TOTAL, "outcome" => outcome).increment(1);
                }
                on_event(event);
                if is_exit {
                    runners.remove(&fan_out_session_id);
                    break;
                }
            }
        });

        if let Err(e) = runner.start(initial_prompt, options).await {
            self.runners.remove(&session_id);
            return Err(e.into());
        }
        metrics::counter!(RUNNER_STARTS_TOTAL, "spawn_mode" => spawn_mode_label).increment(1);
        debug!("session started");
        Ok(())
    }

    /// `stopSession(session_id)` (spec.md §4.4): request the Runner stop
    /// if present; the entry is removed by the fan-out task once the
    /// Runner's `exit` event arrives, not here.
    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        if let Some(runner) = self.runners.get(session_id).map(|r| Arc::clone(r.value())) {
            runner.stop().await?;
        }
        Ok(())
    }

    /// `stopAll()` (spec.md §4.4).
    pub async fn stop_all(&self) -> Result<()> {
        let ids: Vec<String> = self.runners.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_session(&id).await?;
        }
        Ok(())
    }

    /// `hasRunningSession(session_id)` (spec.md §4.4).
    #[must_use]
    pub fn has_running_session(&self, session_id: &str) -> bool {
        self.runners.get(session_id).is_some_and(|r| r.is_running())
    }

    /// `getRunner(session_id)` (spec.md §4.4).
    #[must_use]
    pub fn get_runner(&self, session_id: &str) -> Option<Arc<Runner>> {
        self.runners.get(session_id).map(|r| Arc::clone(r.value()))
    }

    /// Number of sessions with a live map entry (running or mid-shutdown).
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.runners.len()
    }
}
