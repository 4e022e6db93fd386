//! Conversions between `sessions` table rows and [`conduit_core::session::Session`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use conduit_core::ids::{SessionId, UpstreamSessionId};
use conduit_core::permissions::PermissionMode;
use conduit_core::session::{Session, SessionStatus};
use conduit_core::tokens::TokenCounters;
use rusqlite::Row;

use crate::errors::{Result, StoreError};

pub(crate) fn status_to_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Idle => "idle",
        SessionStatus::Running => "running",
        SessionStatus::WaitingPermission => "waiting_permission",
        SessionStatus::WaitingInput => "waiting_input",
    }
}

fn status_from_str(raw: &str) -> Result<SessionStatus> {
    match raw {
        "idle" => Ok(SessionStatus::Idle),
        "running" => Ok(SessionStatus::Running),
        "waiting_permission" => Ok(SessionStatus::WaitingPermission),
        "waiting_input" => Ok(SessionStatus::WaitingInput),
        other => Err(StoreError::Internal(format!("unknown session status: {other}"))),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Internal(format!("bad timestamp {raw}: {e}")))
}

/// Bind a `Session`'s fields as `rusqlite` params for an `INSERT`/`UPDATE`.
pub(crate) struct SessionParams {
    pub id: String,
    pub name: Option<String>,
    pub working_dir: String,
    pub status: String,
    pub created_at: String,
    pub last_activity_at: String,
    pub ended_at: Option<String>,
    pub upstream_session_id: Option<String>,
    pub model: Option<String>,
    pub permission_mode: String,
    pub usage_json: String,
    pub usage_by_model_json: String,
}

impl SessionParams {
    pub fn from_session(session: &Session) -> Result<Self> {
        Ok(Self {
            id: session.id.to_string(),
            name: session.name.clone(),
            working_dir: session.working_dir.clone(),
            status: status_to_str(session.status).to_owned(),
            created_at: session.created_at.to_rfc3339(),
            last_activity_at: session.last_activity_at.to_rfc3339(),
            ended_at: session.ended_at.map(|t| t.to_rfc3339()),
            upstream_session_id: session.upstream_session_id.as_ref().map(ToString::to_string),
            model: session.model.clone(),
            permission_mode: session.permission_mode.as_str().to_owned(),
            usage_json: serde_json::to_string(&session.usage)?,
            usage_by_model_json: serde_json::to_string(&session.usage_by_model)?,
        })
    }
}

/// Deserialize one `sessions` row into a [`Session`].
pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let usage_json: String = row.get("usage_json")?;
    let usage_by_model_json: String = row.get("usage_by_model_json")?;
    let status_raw: String = row.get("status")?;
    let created_at_raw: String = row.get("created_at")?;
    let last_activity_raw: String = row.get("last_activity_at")?;
    let ended_at_raw: Option<String> = row.get("ended_at")?;
    let permission_mode_raw: String = row.get("permission_mode")?;

    let to_sqlite_err = |e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    let status = status_from_str(&status_raw).map_err(to_sqlite_err)?;
    let created_at = parse_timestamp(&created_at_raw).map_err(to_sqlite_err)?;
    let last_activity_at = parse_timestamp(&last_activity_raw).map_err(to_sqlite_err)?;
    let ended_at = ended_at_raw.map(|s| parse_timestamp(&s)).transpose().map_err(to_sqlite_err)?;
    let permission_mode = PermissionMode::parse(&permission_mode_raw).ok_or_else(|| {
        to_sqlite_err(StoreError::Internal(format!("unknown permission mode: {permission_mode_raw}")))
    })?;
    let usage: TokenCounters = serde_json::from_str(&usage_json)
        .map_err(|e| to_sqlite_err(StoreError::Serde(e)))?;
    let usage_by_model: BTreeMap<String, TokenCounters> = serde_json::from_str(&usage_by_model_json)
        .map_err(|e| to_sqlite_err(StoreError::Serde(e)))?;

    Ok(Session {
        id: SessionId::from_string(row.get("id")?),
        name: row.get("name")?,
        working_dir: row.get("working_dir")?,
        status,
        created_at,
        last_activity_at,
        ended_at,
        upstream_session_id: row
            .get::<_, Option<String>>("upstream_session_id")?
            .map(UpstreamSessionId::from_string),
        model: row.get("model")?,
        permission_mode,
        usage,
        usage_by_model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_strings() {
        for status in [
            SessionStatus::Idle,
            SessionStatus::Running,
            SessionStatus::WaitingPermission,
            SessionStatus::WaitingInput,
        ] {
            let raw = status_to_str(status);
            assert_eq!(status_from_str(raw).unwrap(), status);
        }
    }
}
