//! `trigger_participant` ingestion (spec §4.4).

use crate::dispatcher::{load_thread_in_workspace, Dispatcher, RequestContext};
use crate::domain::auth::Operation;
use crate::domain::trigger::{resolve_trigger_decision, TriggerJob};
use crate::errors::BridgeError;
use crate::ids::{build_trigger_id, AgentId, ThreadId, TriggerId};
use chrono::Utc;
use serde_json::json;

pub struct TriggerParticipantInput {
    pub thread_id: ThreadId,
    pub target_agent_id: AgentId,
    pub reason: String,
    pub trigger_prompt: String,
}

pub struct TriggerDecisionOutcome {
    pub job: TriggerJob,
    pub created: bool,
    pub trigger_id: TriggerId,
}

impl Dispatcher {
    pub async fn trigger_participant(
        &self,
        ctx: &RequestContext,
        request_id: &str,
        input: TriggerParticipantInput,
    ) -> Result<TriggerDecisionOutcome, BridgeError> {
        self.authorize(ctx.claims.role, Operation::ThreadManage)?;

        let thread = load_thread_in_workspace(&self.stores, &input.thread_id, &ctx.claims.workspace_id).await?;
        if !thread.is_participant(&input.target_agent_id) {
            return Err(BridgeError::InvalidArgument(format!(
                "{} is not a participant of thread {}",
                input.target_agent_id, input.thread_id
            )));
        }

        let trigger_id = build_trigger_id(request_id);

        let session = self
            .stores
            .sessions
            .get_session(&input.target_agent_id, &ctx.claims.workspace_id)
            .await
            .map_err(BridgeError::Internal)?;

        let now = Utc::now();
        let decision = resolve_trigger_decision(session.as_ref(), now, self.config.session_stale_after_hours);

        let candidate = TriggerJob {
            trigger_id: trigger_id.clone(),
            thread_id: input.thread_id.clone(),
            workspace_id: ctx.claims.workspace_id.clone(),
            target_agent_id: input.target_agent_id.clone(),
            target_session_id: session.as_ref().map(|s| s.session_id.clone()),
            reason: input.reason.clone(),
            prompt: input.trigger_prompt.clone(),
            status: decision.initial_status,
            attempts: 0,
            max_retries: self.config.trigger_max_retries,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        };

        let (stored, created) = self.stores.triggers.insert_or_get(candidate).await.map_err(BridgeError::Internal)?;

        if !created
            && !stored.matches_replay(
                &input.thread_id,
                &ctx.claims.workspace_id,
                &input.target_agent_id,
                &input.reason,
                &input.trigger_prompt,
            )
        {
            self.audit_rejected(
                ctx,
                "trigger_participant",
                "trigger",
                trigger_id.as_str(),
                Some(input.thread_id.clone()),
                json!({ "subcode": "REQUEST_ID_REUSED_WITH_DIFFERENT_PAYLOAD" }),
            )
            .await;
            return Err(BridgeError::IdempotencyConflict);
        }

        self.audit_success(
            ctx,
            "trigger_participant",
            "trigger",
            trigger_id.as_str(),
            Some(input.thread_id.clone()),
            json!({ "created": created, "status": stored.status.as_str() }),
        )
        .await;

        Ok(TriggerDecisionOutcome { job: stored, created, trigger_id })
    }
}
