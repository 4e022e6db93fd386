//! Single-flight binding creation (spec.md §4.5 "Concurrent creation of
//! bindings", §5 on concurrent `ThreadBinding` races).
//!
//! Concurrent `findOrCreateSession` calls for the same `(team, channel,
//! thread)` key must share one `make_session` execution; every caller
//! observes the same resulting session id.

use std::collections::HashMap;
use std::sync::Arc;

use conduit_core::ids::SessionId;
use parking_lot::{Condvar, Mutex};

use crate::errors::{Result, StoreError};

type Key = (String, String, String);

struct Slot {
    outcome: Mutex<Option<std::result::Result<SessionId, String>>>,
    ready: Condvar,
}

/// Tracks in-flight `findOrCreateSession` calls keyed by `(team, channel,
/// thread)`.
#[derive(Default)]
pub(crate) struct PendingCreations {
    slots: Mutex<HashMap<Key, Arc<Slot>>>,
}

impl PendingCreations {
    /// The keys currently pending — backs `includePending` liveness checks
    /// for external observers (spec.md §4.5).
    pub fn pending_keys(&self) -> Vec<Key> {
        self.slots.lock().keys().cloned().collect()
    }

    /// Run `make` exactly once per distinct `key` among concurrent callers;
    /// all callers sharing a key receive the same result.
    pub fn find_or_create<F>(&self, key: Key, make: F) -> Result<SessionId>
    where
        F: FnOnce() -> Result<SessionId>,
    {
        let (slot, is_leader) = {
            let mut slots = self.slots.lock();
            if let Some(existing) = slots.get(&key) {
                (existing.clone(), false)
            } else {
                let slot = Arc::new(Slot {
                    outcome: Mutex::new(None),
                    ready: Condvar::new(),
                });
                slots.insert(key.clone(), slot.clone());
                (slot, true)
            }
        };

        if is_leader {
            let result = make();
            *slot.outcome.lock() = Some(result.as_ref().map(Clone::clone).map_err(ToString::to_string));
            slot.ready.notify_all();
            self.slots.lock().remove(&key);
            result
        } else {
            let mut guard = slot.outcome.lock();
            while guard.is_none() {
                slot.ready.wait(&mut guard);
            }
            match guard.clone().expect("checked is_none above") {
                Ok(id) => Ok(id),
                Err(message) => Err(StoreError::Internal(message)),
            }
        }
    }
}
