//! `SessionStore`: durable session/message/binding persistence with an
//! ephemeral tier (spec.md §4.5).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_core::ids::SessionId;
use conduit_core::messages::{MessageItem, MessageRow};
use conduit_core::permissions::PermissionMode;
use conduit_core::session::{Session, SessionStatus, ThreadBinding};
use conduit_core::tokens::TokenCounters;
use parking_lot::RwLock;
use rusqlite::{params, OptionalExtension};

use crate::connection::{self, ConnectionConfig, ConnectionPool};
use crate::errors::{Result, StoreError};
use crate::migrations;
use crate::pending::PendingCreations;
use crate::row_types::{session_from_row, status_to_str, SessionParams};

struct EphemeralEntry {
    session: Session,
}

/// The session store: a thin ephemeral tier in front of a `SQLite`-backed
/// durable store (spec.md §4.5).
pub struct SessionStore {
    pool: ConnectionPool,
    ephemeral: RwLock<HashMap<SessionId, EphemeralEntry>>,
    pending: PendingCreations,
}

impl SessionStore {
    /// Open an in-memory-only store (process lifetime only; no durability
    /// across restarts). Used for tests and fully-ephemeral deployments.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    /// Open a file-backed store at `path`, running migrations as needed.
    pub fn open_file(path: &str) -> Result<Self> {
        Self::new(connection::new_file(path, &ConnectionConfig::default())?)
    }

    fn new(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            pool,
            ephemeral: RwLock::new(HashMap::new()),
            pending: PendingCreations::default(),
        })
    }

    /// `createSession(opts) -> Session` (spec.md §4.5). A session created
    /// with no explicit `name` starts ephemeral.
    pub fn create_session(&self, name: Option<String>, working_dir: impl Into<String>) -> Result<Session> {
        let session = Session::new(SessionId::new(), name, working_dir);
        if session.is_ephemeral_on_creation() {
            self.ephemeral.write().insert(
                session.id.clone(),
                EphemeralEntry {
                    session: session.clone(),
                },
            );
        } else {
            self.upsert_durable(&session)?;
        }
        Ok(session)
    }

    /// `getSession(id)`.
    pub fn get_session(&self, id: &SessionId) -> Result<Option<Session>> {
        if let Some(entry) = self.ephemeral.read().get(id) {
            return Ok(Some(entry.session.clone()));
        }
        self.get_durable(id)
    }

    /// `isEphemeral(id)` query primitive.
    pub fn is_ephemeral(&self, id: &SessionId) -> bool {
        self.ephemeral.read().contains_key(id)
    }

    /// `listSessions()`: ephemeral first, then durable by recency
    /// (spec.md §4.5).
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut ephemeral: Vec<Session> = self.ephemeral.read().values().map(|e| e.session.clone()).collect();
        ephemeral.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT * FROM sessions ORDER BY last_activity_at DESC")?;
        let durable = stmt
            .query_map([], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        ephemeral.extend(durable);
        Ok(ephemeral)
    }

    /// `countSessions(filter)` — supplemental operation (`SPEC_FULL.md` §4.5).
    pub fn count_sessions(&self, status_filter: Option<SessionStatus>) -> Result<usize> {
        let ephemeral_count = self
            .ephemeral
            .read()
            .values()
            .filter(|e| status_filter.is_none_or(|f| e.session.status == f))
            .count();

        let conn = self.pool.get()?;
        let durable_count: i64 = match status_filter {
            Some(status) => conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE status = ?1",
                params![status_to_str(status)],
                |r| r.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?,
        };
        Ok(ephemeral_count + durable_count as usize)
    }

    /// `deleteSession(id)` (cascades to messages and bindings).
    pub fn delete_session(&self, id: &SessionId) -> Result<()> {
        if self.ephemeral.write().remove(id).is_some() {
            return Ok(());
        }
        let conn = self.pool.get()?;
        let changed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// `renameSession(id, name)`. Promotes an ephemeral session to durable.
    pub fn rename_session(&self, id: &SessionId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.promote_and_mutate(id, |s| s.name = Some(name))
    }

    /// `updateSessionStatus(id, status)`. Status updates to an ephemeral
    /// session remain in memory (spec.md §4.5) — no promotion.
    pub fn update_session_status(&self, id: &SessionId, status: SessionStatus) -> Result<()> {
        if let Some(entry) = self.ephemeral.write().get_mut(id) {
            entry.session.status = status;
            return Ok(());
        }
        let mut session = self.require_durable(id)?;
        session.status = status;
        session.last_activity_at = Utc::now();
        self.upsert_durable(&session)
    }

    /// `setModel(id, model)`. Model updates to an ephemeral session remain
    /// in memory (spec.md §4.5) — no promotion.
    pub fn set_model(&self, id: &SessionId, model: impl Into<String>) -> Result<()> {
        let model = model.into();
        if let Some(entry) = self.ephemeral.write().get_mut(id) {
            entry.session.model = Some(model);
            return Ok(());
        }
        let mut session = self.require_durable(id)?;
        session.model = Some(model);
        session.last_activity_at = Utc::now();
        self.upsert_durable(&session)
    }

    /// `setUpstreamSessionId(id, uid)`.
    pub fn set_upstream_session_id(&self, id: &SessionId, upstream_id: impl Into<String>) -> Result<()> {
        let upstream_id = upstream_id.into();
        self.promote_and_mutate(id, |s| {
            s.upstream_session_id = Some(conduit_core::ids::UpstreamSessionId::from_string(upstream_id));
        })
    }

    /// `setPermissionMode(id, mode)`.
    pub fn set_permission_mode(&self, id: &SessionId, mode: PermissionMode) -> Result<()> {
        self.promote_and_mutate(id, |s| s.permission_mode = mode)
    }

    /// `addToHistory(id, MessageItem)`, returning the assigned sequence
    /// number. Promotes an ephemeral session to durable on first call
    /// (spec.md §4.5).
    pub fn add_to_history(&self, id: &SessionId, item: MessageItem) -> Result<u64> {
        if let Some(entry) = self.ephemeral.write().remove(id) {
            self.upsert_durable(&entry.session)?;
        } else if self.get_durable(id)?.is_none() {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }

        let conn = self.pool.get()?;
        let seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM messages WHERE session_id = ?1",
            params![id.as_str()],
            |r| r.get(0),
        )?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO messages (session_id, seq, item_json, timestamp) VALUES (?1,?2,?3,?4)",
            params![id.as_str(), seq, serde_json::to_string(&item)?, now.to_rfc3339()],
        )?;
        conn.execute(
            "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id.as_str()],
        )?;
        Ok(seq as u64)
    }

    /// `getHistory(id)`, in strict insertion order.
    pub fn get_history(&self, id: &SessionId) -> Result<Vec<MessageRow>> {
        if self.ephemeral.read().contains_key(id) {
            return Ok(Vec::new());
        }
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT seq, item_json, timestamp FROM messages WHERE session_id = ?1 ORDER BY seq")?;
        let raw = stmt
            .query_map(params![id.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(seq, item_json, ts)| {
                let item: MessageItem = serde_json::from_str(&item_json)?;
                let timestamp = parse_rfc3339(&ts)?;
                Ok(MessageRow {
                    session_id: id.clone(),
                    seq: seq as u64,
                    item,
                    timestamp,
                })
            })
            .collect()
    }

    /// `addUsage(id, counters)` (additive, overall only).
    pub fn add_usage(&self, id: &SessionId, counters: TokenCounters) -> Result<()> {
        self.promote_and_mutate(id, |s| s.usage = s.usage.saturating_add(&counters))
    }

    /// `addModelUsage(id, model, counters)` (additive, overall and
    /// per-model).
    pub fn add_model_usage(&self, id: &SessionId, model: &str, counters: TokenCounters) -> Result<()> {
        let model = model.to_owned();
        self.promote_and_mutate(id, move |s| s.record_usage(&model, counters))
    }

    /// `saveBinding(b)`: unique on `(team, channel, thread)` and on
    /// `session_id` (spec.md §3 "one-to-one, unique on either key").
    pub fn save_binding(&self, binding: &ThreadBinding) -> Result<()> {
        let conn = self.pool.get()?;
        let result = conn.execute(
            "INSERT INTO bindings (team, channel, thread, session_id) VALUES (?1,?2,?3,?4)",
            params![binding.team, binding.channel, binding.thread, binding.session_id.as_str()],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                Err(StoreError::BindingConflict {
                    team: binding.team.clone(),
                    channel: binding.channel.clone(),
                    thread: binding.thread.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `listBindings()`.
    pub fn list_bindings(&self) -> Result<Vec<ThreadBinding>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT team, channel, thread, session_id FROM bindings")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ThreadBinding {
                    team: row.get(0)?,
                    channel: row.get(1)?,
                    thread: row.get(2)?,
                    session_id: SessionId::from_string(row.get(3)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `findOrCreateSession(team, channel, thread, make_session)`
    /// (spec.md §4.5, single-flight per key).
    pub fn find_or_create_session<F>(
        &self,
        team: &str,
        channel: &str,
        thread: &str,
        make_session: F,
    ) -> Result<Session>
    where
        F: FnOnce() -> Result<Session>,
    {
        if let Some(existing) = self.lookup_binding(team, channel, thread)? {
            return self.require_any(&existing);
        }

        let key = (team.to_owned(), channel.to_owned(), thread.to_owned());
        let id = self.pending.find_or_create(key, || {
            if let Some(existing) = self.lookup_binding(team, channel, thread)? {
                return Ok(existing);
            }
            let session = make_session()?;
            self.save_binding(&ThreadBinding {
                team: team.to_owned(),
                channel: channel.to_owned(),
                thread: thread.to_owned(),
                session_id: session.id.clone(),
            })?;
            Ok(session.id)
        })?;
        self.require_any(&id)
    }

    /// Keys of bindings currently mid-creation — backs `includePending`
    /// liveness checks for external observers (spec.md §4.5).
    pub fn pending_binding_keys(&self) -> Vec<(String, String, String)> {
        self.pending.pending_keys()
    }

    /// `pruneEphemeralOlderThan(duration)` — supplemental operation
    /// (`SPEC_FULL.md` §4.5). Returns the number of sessions discarded.
    pub fn prune_ephemeral_older_than(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let mut guard = self.ephemeral.write();
        let before = guard.len();
        guard.retain(|_, entry| entry.session.last_activity_at >= cutoff);
        before - guard.len()
    }

    fn lookup_binding(&self, team: &str, channel: &str, thread: &str) -> Result<Option<SessionId>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT session_id FROM bindings WHERE team = ?1 AND channel = ?2 AND thread = ?3",
            params![team, channel, thread],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map(|opt| opt.map(SessionId::from_string))
        .map_err(Into::into)
    }

    fn require_any(&self, id: &SessionId) -> Result<Session> {
        self.get_session(id)?.ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    fn require_durable(&self, id: &SessionId) -> Result<Session> {
        self.get_durable(id)?.ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    fn get_durable(&self, id: &SessionId) -> Result<Option<Session>> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT * FROM sessions WHERE id = ?1", params![id.as_str()], session_from_row)
            .optional()
            .map_err(Into::into)
    }

    fn upsert_durable(&self, session: &Session) -> Result<()> {
        let p = SessionParams::from_session(session)?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO sessions (id, name, working_dir, status, created_at, last_activity_at, ended_at,
               upstream_session_id, model, permission_mode, usage_json, usage_by_model_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name, working_dir = excluded.working_dir, status = excluded.status,
               last_activity_at = excluded.last_activity_at, ended_at = excluded.ended_at,
               upstream_session_id = excluded.upstream_session_id, model = excluded.model,
               permission_mode = excluded.permission_mode, usage_json = excluded.usage_json,
               usage_by_model_json = excluded.usage_by_model_json",
            params![
                p.id,
                p.name,
                p.working_dir,
                p.status,
                p.created_at,
                p.last_activity_at,
                p.ended_at,
                p.upstream_session_id,
                p.model,
                p.permission_mode,
                p.usage_json,
                p.usage_by_model_json,
            ],
        )?;
        Ok(())
    }

    /// Promote an ephemeral session to durable (if it is one) and apply
    /// `f`, stamping `last_activity_at`. This is the "any other persistent
    /// mutation" path of spec.md §4.5.
    fn promote_and_mutate<F>(&self, id: &SessionId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Session),
    {
        let ephemeral_session = self.ephemeral.write().remove(id).map(|e| e.session);
        let mut session = match ephemeral_session {
            Some(session) => session,
            None => self.require_durable(id)?,
        };
        f(&mut session);
        session.last_activity_at = Utc::now();
        self.upsert_durable(&session)
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Internal(format!("bad timestamp {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::content::ToolResultContent;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unnamed_session_is_ephemeral_and_invisible_to_durable_query() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None, "/work").unwrap();
        assert!(store.is_ephemeral(&session.id));
        assert!(store.get_durable(&session.id).unwrap().is_none());
        assert_eq!(store.get_session(&session.id).unwrap().unwrap().id, session.id);
    }

    #[test]
    fn named_session_is_durable_immediately() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(Some("my session".into()), "/work").unwrap();
        assert!(!store.is_ephemeral(&session.id));
        assert!(store.get_durable(&session.id).unwrap().is_some());
    }

    #[test]
    fn rename_promotes_ephemeral_session() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None, "/work").unwrap();
        store.rename_session(&session.id, "now named").unwrap();
        assert!(!store.is_ephemeral(&session.id));
        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.name.as_deref(), Some("now named"));
    }

    #[test]
    fn add_to_history_promotes_and_assigns_sequential_seq() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None, "/work").unwrap();
        let seq0 = store
            .add_to_history(&session.id, MessageItem::User { text: "hi".into(), images: vec![] })
            .unwrap();
        let seq1 = store
            .add_to_history(
                &session.id,
                MessageItem::Assistant { text: "hello".into() },
            )
            .unwrap();
        assert_eq!(seq0, 0);
        assert_eq!(seq1, 1);
        assert!(!store.is_ephemeral(&session.id));

        let history = store.get_history(&session.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].seq, 0);
        assert_eq!(history[1].seq, 1);
    }

    #[test]
    fn status_and_model_updates_stay_in_memory_for_ephemeral_sessions() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None, "/work").unwrap();
        store.update_session_status(&session.id, SessionStatus::Running).unwrap();
        store.set_model(&session.id, "claude-opus").unwrap();
        assert!(store.is_ephemeral(&session.id));
        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Running);
        assert_eq!(loaded.model.as_deref(), Some("claude-opus"));
    }

    #[test]
    fn set_permission_mode_promotes_ephemeral_session() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(None, "/work").unwrap();
        store.set_permission_mode(&session.id, PermissionMode::Plan).unwrap();
        assert!(!store.is_ephemeral(&session.id));
    }

    #[test]
    fn delete_session_cascades_messages_and_bindings() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(Some("s".into()), "/work").unwrap();
        store
            .add_to_history(&session.id, MessageItem::User { text: "hi".into(), images: vec![] })
            .unwrap();
        store
            .save_binding(&ThreadBinding {
                team: "T".into(),
                channel: "C".into(),
                thread: "1".into(),
                session_id: session.id.clone(),
            })
            .unwrap();

        store.delete_session(&session.id).unwrap();
        assert!(store.get_session(&session.id).unwrap().is_none());
        assert!(store.list_bindings().unwrap().is_empty());
    }

    #[test]
    fn delete_unknown_session_errors() {
        let store = SessionStore::open_in_memory().unwrap();
        let err = store.delete_session(&SessionId::new()).unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }

    #[test]
    fn list_sessions_orders_ephemeral_first_then_durable_by_recency() {
        let store = SessionStore::open_in_memory().unwrap();
        let durable = store.create_session(Some("durable".into()), "/work").unwrap();
        let ephemeral = store.create_session(None, "/work").unwrap();

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions[0].id, ephemeral.id);
        assert_eq!(sessions[1].id, durable.id);
    }

    #[test]
    fn save_binding_rejects_duplicate_thread_key() {
        let store = SessionStore::open_in_memory().unwrap();
        let s1 = store.create_session(Some("a".into()), "/work").unwrap();
        let s2 = store.create_session(Some("b".into()), "/work").unwrap();
        let binding = ThreadBinding {
            team: "T".into(),
            channel: "C".into(),
            thread: "1".into(),
            session_id: s1.id.clone(),
        };
        store.save_binding(&binding).unwrap();

        let conflicting = ThreadBinding {
            session_id: s2.id,
            ..binding
        };
        let err = store.save_binding(&conflicting).unwrap_err();
        assert!(matches!(err, StoreError::BindingConflict { .. }));
    }

    #[test]
    fn find_or_create_session_reuses_existing_binding() {
        let store = SessionStore::open_in_memory().unwrap();
        let first = store
            .find_or_create_session("T", "C", "1", || store.create_session(Some("from-thread".into()), "/work"))
            .unwrap();
        let second = store
            .find_or_create_session("T", "C", "1", || panic!("should not be called again"))
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn find_or_create_session_is_single_flight_under_concurrency() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    store
                        .find_or_create_session("T", "C", "racey", || {
                            thread::sleep(Duration::from_millis(10));
                            store.create_session(Some("racer".into()), "/work")
                        })
                        .unwrap()
                })
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().id).collect();
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn add_usage_and_add_model_usage_are_additive() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(Some("s".into()), "/work").unwrap();
        let counters = TokenCounters {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
        };
        store.add_usage(&session.id, counters).unwrap();
        store.add_model_usage(&session.id, "claude-opus", counters).unwrap();

        let loaded = store.get_session(&session.id).unwrap().unwrap();
        assert_eq!(loaded.usage.input_tokens, 20);
        assert_eq!(loaded.usage_by_model["claude-opus"].input_tokens, 10);
    }

    #[test]
    fn prune_ephemeral_discards_stale_sessions_only() {
        let store = SessionStore::open_in_memory().unwrap();
        let stale = store.create_session(None, "/work").unwrap();
        let fresh = store.create_session(None, "/work").unwrap();
        {
            let mut guard = store.ephemeral.write();
            guard.get_mut(&stale.id).unwrap().session.last_activity_at =
                Utc::now() - chrono::Duration::hours(2);
        }
        let pruned = store.prune_ephemeral_older_than(Duration::from_secs(3600));
        assert_eq!(pruned, 1);
        assert!(store.get_session(&stale.id).unwrap().is_none());
        assert!(store.get_session(&fresh.id).unwrap().is_some());
    }

    #[test]
    fn tool_result_round_trips_structured_content() {
        let store = SessionStore::open_in_memory().unwrap();
        let session = store.create_session(Some("s".into()), "/work").unwrap();
        let tool_use_id = conduit_core::ids::ToolUseId::new();
        store
            .add_to_history(
                &session.id,
                MessageItem::ToolUse {
                    tool_use_id: tool_use_id.clone(),
                    tool_name: "Bash".into(),
                    input: serde_json::json!({"command": "ls"}),
                },
            )
            .unwrap();
        store
            .add_to_history(
                &session.id,
                MessageItem::ToolResult {
                    tool_use_id,
                    content: ToolResultContent::Structured(serde_json::json!({"files": ["a"]})),
                    is_error: false,
                },
            )
            .unwrap();
        let history = store.get_history(&session.id).unwrap();
        assert_eq!(history.len(), 2);
    }
}
