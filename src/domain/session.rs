//! Session/runtime registry entity (spec §3/§4.10).

use crate::ids::{AgentId, SessionId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ManagementMode {
    Managed,
    Unmanaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    Offline,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub agent_id: AgentId,
    pub workspace_id: WorkspaceId,
    pub session_id: SessionId,
    pub runtime: String,
    pub management_mode: ManagementMode,
    pub resumable: bool,
    pub status: SessionStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// A session is stale iff `now - last_heartbeat_at >= stale_after_hours`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after_hours: i64) -> bool {
        let elapsed = now - self.last_heartbeat_at;
        elapsed >= chrono::Duration::hours(stale_after_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_at(hb: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            agent_id: AgentId::from("a1"),
            workspace_id: WorkspaceId::from("w1"),
            session_id: SessionId::from("s1"),
            runtime: "tmux:foo".into(),
            management_mode: ManagementMode::Managed,
            resumable: true,
            status: SessionStatus::Idle,
            last_heartbeat_at: hb,
            updated_at: hb,
        }
    }

    #[test]
    fn fresh_heartbeat_is_not_stale() {
        let now = Utc::now();
        let s = session_at(now);
        assert!(!s.is_stale(now, 12));
    }

    #[test]
    fn heartbeat_exactly_at_threshold_is_stale() {
        let now = Utc::now();
        let s = session_at(now - chrono::Duration::hours(12));
        assert!(s.is_stale(now, 12));
    }

    #[test]
    fn old_heartbeat_is_stale() {
        let now = Utc::now();
        let s = session_at(now - chrono::Duration::hours(48));
        assert!(s.is_stale(now, 12));
    }
}
