//! Append-only audit event entity (spec §3).

use crate::ids::{AgentId, ThreadId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEvent {
    pub workspace_id: WorkspaceId,
    pub actor_agent_id: Option<AgentId>,
    pub actor_role: Option<String>,
    pub operation: String,
    pub resource_type: String,
    pub resource_id: String,
    pub thread_id: Option<ThreadId>,
    pub request_id: Option<String>,
    pub result: AuditResult,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}
