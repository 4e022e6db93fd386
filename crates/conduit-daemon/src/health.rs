//! `/health` endpoint (SPEC_FULL.md §6: process uptime, active-session
//! count, DB reachability), grounded on the teacher's `tron-server::health`.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` if the store is reachable, `"degraded"` otherwise.
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
    pub active_sessions: usize,
    pub store_reachable: bool,
}

/// Build a health response from live counters.
#[must_use]
pub fn health_check(
    start_time: Instant,
    connections: usize,
    active_sessions: usize,
    store_reachable: bool,
) -> HealthResponse {
    HealthResponse {
        status: if store_reachable { "ok".into() } else { "degraded".into() },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_sessions,
        store_reachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok_when_store_reachable() {
        let resp = health_check(Instant::now(), 0, 0, true);
        assert_eq!(resp.status, "ok");
    }

    #[test]
    fn status_is_degraded_when_store_unreachable() {
        let resp = health_check(Instant::now(), 0, 0, false);
        assert_eq!(resp.status, "degraded");
    }

    #[test]
    fn counters_are_carried() {
        let resp = health_check(Instant::now(), 5, 3, true);
        assert_eq!(resp.connections, 5);
        assert_eq!(resp.active_sessions, 3);
    }

    #[test]
    fn serialization_has_expected_fields() {
        let resp = health_check(Instant::now(), 1, 1, true);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].is_number());
    }
}
