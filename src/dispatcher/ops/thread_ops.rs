//! `create_thread`, `get_thread`, `update_thread_status`, `summarize_thread`
//! (spec §4.1, dispatched through the §4.3 pipeline).

use crate::dispatcher::{load_thread_in_workspace, Dispatcher, RequestContext};
use crate::domain::auth::{Operation, Role};
use crate::domain::thread::{ThreadRecord, ThreadStatus, ThreadSummary, ThreadType};
use crate::errors::BridgeError;
use crate::ids::{AgentId, ThreadId};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

pub struct CreateThreadInput {
    pub title: String,
    pub thread_type: ThreadType,
    pub participants: Vec<AgentId>,
}

impl Dispatcher {
    pub async fn create_thread(
        &self,
        ctx: &RequestContext,
        input: CreateThreadInput,
    ) -> Result<ThreadRecord, BridgeError> {
        self.authorize(ctx.claims.role, Operation::ThreadManage)?;

        let mut participants = Vec::new();
        for agent in input.participants {
            if !participants.contains(&agent) {
                participants.push(agent);
            }
        }

        let thread_id = ThreadId(format!("thr_{}", Uuid::new_v4().simple()));
        let now = Utc::now();
        let thread = self
            .stores
            .threads
            .create_thread(
                &thread_id,
                &ctx.claims.workspace_id,
                &input.title,
                input.thread_type,
                participants,
                now,
            )
            .await
            .map_err(BridgeError::Internal)?;

        self.audit_success(
            ctx,
            "create_thread",
            "thread",
            thread.thread_id.as_str(),
            Some(thread.thread_id.clone()),
            json!({ "title": thread.title, "thread_type": thread.thread_type.as_str() }),
        )
        .await;

        Ok(thread)
    }

    pub async fn get_thread(&self, ctx: &RequestContext, thread_id: &ThreadId) -> Result<ThreadRecord, BridgeError> {
        self.authorize(ctx.claims.role, Operation::ThreadRead)?;
        load_thread_in_workspace(&self.stores, thread_id, &ctx.claims.workspace_id).await
    }

    pub async fn update_thread_status(
        &self,
        ctx: &RequestContext,
        thread_id: &ThreadId,
        next: ThreadStatus,
        reason: Option<&str>,
    ) -> Result<ThreadRecord, BridgeError> {
        self.authorize(ctx.claims.role, Operation::ThreadManage)?;
        let thread = load_thread_in_workspace(&self.stores, thread_id, &ctx.claims.workspace_id).await?;

        if !thread.status.can_transition_to(next) {
            self.audit_rejected(
                ctx,
                "update_thread_status",
                "thread",
                thread_id.as_str(),
                Some(thread_id.clone()),
                json!({ "from": thread.status.as_str(), "to": next.as_str() }),
            )
            .await;
            return Err(BridgeError::InvalidThreadTransition {
                from: thread.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        if ctx.claims.role == Role::Participant && next == ThreadStatus::Closed {
            self.audit_rejected(
                ctx,
                "update_thread_status",
                "thread",
                thread_id.as_str(),
                Some(thread_id.clone()),
                json!({ "subcode": "PARTICIPANT_CANNOT_CLOSE" }),
            )
            .await;
            return Err(BridgeError::Forbidden { subcode: "PARTICIPANT_CANNOT_CLOSE" });
        }

        if thread.status == ThreadStatus::Blocked && next == ThreadStatus::Closed {
            let is_owner = thread.escalation_owner_agent_id.as_ref() == Some(&ctx.claims.agent_id);
            let has_override = reason.map(crate::domain::trigger::is_override_reason).unwrap_or(false);
            if !is_owner && !has_override {
                self.audit_rejected(
                    ctx,
                    "update_thread_status",
                    "thread",
                    thread_id.as_str(),
                    Some(thread_id.clone()),
                    json!({ "subcode": "MISSING_CLOSE_OVERRIDE" }),
                )
                .await;
                return Err(BridgeError::Forbidden { subcode: "MISSING_CLOSE_OVERRIDE" });
            }
        }

        let now = Utc::now();
        let updated = self
            .stores
            .threads
            .update_thread_status(thread_id, next, now, thread.status)
            .await
            .map_err(BridgeError::Internal)?
            .ok_or_else(|| BridgeError::Conflict("thread status changed concurrently".into()))?;

        self.audit_success(
            ctx,
            "update_thread_status",
            "thread",
            thread_id.as_str(),
            Some(thread_id.clone()),
            json!({ "from": thread.status.as_str(), "to": next.as_str() }),
        )
        .await;

        Ok(updated)
    }

    pub async fn summarize_thread(
        &self,
        ctx: &RequestContext,
        thread_id: &ThreadId,
        max_messages: usize,
    ) -> Result<ThreadSummary, BridgeError> {
        self.authorize(ctx.claims.role, Operation::ThreadRead)?;
        load_thread_in_workspace(&self.stores, thread_id, &ctx.claims.workspace_id).await?;

        let messages = self
            .stores
            .threads
            .recent_messages_for_summary(thread_id, max_messages)
            .await
            .map_err(BridgeError::Internal)?;

        let summary = if messages.is_empty() {
            "(no messages)".to_string()
        } else {
            messages
                .iter()
                .rev()
                .map(|m| format!("{}: {}", m.sender_agent_id, m.body))
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(ThreadSummary {
            thread_id: thread_id.clone(),
            message_count_considered: messages.len(),
            summary,
        })
    }
}
