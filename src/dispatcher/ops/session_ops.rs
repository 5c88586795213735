//! `heartbeat_session` (spec §4.10).

use crate::dispatcher::{identity_hint_agent, Dispatcher, RequestContext};
use crate::domain::auth::Operation;
use crate::domain::session::{ManagementMode, SessionRecord, SessionStatus};
use crate::errors::BridgeError;
use crate::ids::{AgentId, SessionId, WorkspaceId};
use chrono::Utc;
use serde_json::json;

pub struct HeartbeatInput {
    pub session_id: SessionId,
    pub runtime: String,
    pub management_mode: ManagementMode,
    pub resumable: bool,
    pub status: SessionStatus,
    pub agent_id_hint: Option<AgentId>,
    pub workspace_id_hint: Option<WorkspaceId>,
}

impl Dispatcher {
    pub async fn heartbeat_session(
        &self,
        ctx: &RequestContext,
        input: HeartbeatInput,
    ) -> Result<SessionRecord, BridgeError> {
        self.authorize(ctx.claims.role, Operation::SessionHeartbeat)?;
        identity_hint_agent(&ctx.claims.agent_id, input.agent_id_hint.as_ref())?;
        if let Some(ws) = &input.workspace_id_hint {
            Dispatcher::check_workspace(&ctx.claims.workspace_id, ws)?;
        }

        let now = Utc::now();
        let record = SessionRecord {
            agent_id: ctx.claims.agent_id.clone(),
            workspace_id: ctx.claims.workspace_id.clone(),
            session_id: input.session_id,
            runtime: input.runtime,
            management_mode: input.management_mode,
            resumable: input.resumable,
            status: input.status,
            last_heartbeat_at: now,
            updated_at: now,
        };

        let stored = self.stores.sessions.heartbeat_upsert(record).await.map_err(BridgeError::Internal)?;

        self.audit_success(
            ctx,
            "heartbeat_session",
            "session",
            stored.session_id.as_str(),
            None,
            json!({ "status": stored.status.as_str() }),
        )
        .await;

        Ok(stored)
    }
}
