//! `post_message`, `read_messages`, `ack_read` (spec §4.2).

use crate::dispatcher::{identity_hint_agent, identity_hint_session, load_thread_in_workspace, Dispatcher, RequestContext};
use crate::domain::auth::Operation;
use crate::domain::cursor::ParticipantCursor;
use crate::domain::message::{normalize_metadata, Message, MessageKind, PostMessagePayload};
use crate::errors::BridgeError;
use crate::ids::{AgentId, MessageId, SessionId, ThreadId};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

pub struct PostMessageInput {
    pub thread_id: ThreadId,
    pub schema_version: i32,
    pub kind: MessageKind,
    pub body: Value,
    pub metadata: Option<Value>,
    pub in_reply_to: Option<MessageId>,
    pub idempotency_key: Option<String>,
    pub sender_agent_id_hint: Option<AgentId>,
    pub sender_session_id_hint: Option<SessionId>,
}

pub struct ReadMessagesResult {
    pub messages: Vec<Message>,
    pub next_seq: i64,
    pub has_more: bool,
}

impl Dispatcher {
    pub async fn post_message(&self, ctx: &RequestContext, input: PostMessageInput) -> Result<Message, BridgeError> {
        self.authorize(ctx.claims.role, Operation::MessageWrite)?;
        identity_hint_agent(&ctx.claims.agent_id, input.sender_agent_id_hint.as_ref())?;
        identity_hint_session(ctx.claims.session_id.as_ref(), input.sender_session_id_hint.as_ref())?;

        let thread = load_thread_in_workspace(&self.stores, &input.thread_id, &ctx.claims.workspace_id).await?;
        if !thread.is_participant(&ctx.claims.agent_id) {
            return Err(BridgeError::InvalidArgument("sender is not a participant of this thread".into()));
        }

        let metadata = normalize_metadata(input.kind, input.metadata.unwrap_or(Value::Null))
            .map_err(BridgeError::InvalidArgument)?;

        if let Some(in_reply_to) = &input.in_reply_to {
            self.stores
                .messages
                .get_message(&input.thread_id, in_reply_to)
                .await
                .map_err(BridgeError::Internal)?
                .ok_or_else(|| BridgeError::InvalidArgument("in_reply_to does not reference an existing message in this thread".into()))?;
        }

        let payload = PostMessagePayload {
            schema_version: input.schema_version,
            kind: input.kind,
            body: input.body,
            metadata,
            in_reply_to: input.in_reply_to,
        };

        if let Some(key) = &input.idempotency_key {
            if let Some(existing) = self
                .stores
                .messages
                .find_by_idempotency_key(&input.thread_id, &ctx.claims.agent_id, key)
                .await
                .map_err(BridgeError::Internal)?
            {
                if existing.matches_payload(&payload) {
                    return Ok(existing);
                }
                return Err(BridgeError::IdempotencyConflict);
            }
        }

        let max_attempts = self.config.post_message_max_attempts;
        for _ in 0..max_attempts {
            let latest_seq = self.stores.messages.latest_seq(&input.thread_id).await.map_err(BridgeError::Internal)?;
            let next_seq = latest_seq + 1;
            let message_id = MessageId(format!("msg_{}", Uuid::new_v4().simple()));
            let now = Utc::now();

            let inserted = self
                .stores
                .messages
                .try_insert(
                    &message_id,
                    &input.thread_id,
                    next_seq,
                    &ctx.claims.agent_id,
                    ctx.claims.session_id.as_ref(),
                    &payload,
                    input.idempotency_key.as_deref(),
                    now,
                )
                .await
                .map_err(BridgeError::Internal)?;

            if let Some(message) = inserted {
                self.audit_success(
                    ctx,
                    "post_message",
                    "message",
                    message.message_id.as_str(),
                    Some(input.thread_id.clone()),
                    json!({ "seq": message.seq, "kind": message.kind }),
                )
                .await;
                return Ok(message);
            }

            if let Some(key) = &input.idempotency_key {
                if let Some(existing) = self
                    .stores
                    .messages
                    .find_by_idempotency_key(&input.thread_id, &ctx.claims.agent_id, key)
                    .await
                    .map_err(BridgeError::Internal)?
                {
                    return if existing.matches_payload(&payload) {
                        Ok(existing)
                    } else {
                        Err(BridgeError::IdempotencyConflict)
                    };
                }
            }
        }

        Err(BridgeError::Conflict("exhausted post_message retry attempts".into()))
    }

    pub async fn read_messages(
        &self,
        ctx: &RequestContext,
        thread_id: &ThreadId,
        since_seq: i64,
        limit: i64,
        agent_id_hint: Option<&AgentId>,
    ) -> Result<ReadMessagesResult, BridgeError> {
        self.authorize(ctx.claims.role, Operation::MessageRead)?;
        identity_hint_agent(&ctx.claims.agent_id, agent_id_hint)?;
        load_thread_in_workspace(&self.stores, thread_id, &ctx.claims.workspace_id).await?;

        let messages = self
            .stores
            .messages
            .read_messages(thread_id, since_seq, limit)
            .await
            .map_err(BridgeError::Internal)?;

        let has_more = messages.len() as i64 == limit;
        let next_seq = messages.last().map(|m| m.seq).unwrap_or(since_seq);

        Ok(ReadMessagesResult { messages, next_seq, has_more })
    }

    pub async fn ack_read(
        &self,
        ctx: &RequestContext,
        thread_id: &ThreadId,
        last_read_seq: i64,
        agent_id_hint: Option<&AgentId>,
    ) -> Result<ParticipantCursor, BridgeError> {
        self.authorize(ctx.claims.role, Operation::MessageRead)?;
        identity_hint_agent(&ctx.claims.agent_id, agent_id_hint)?;
        load_thread_in_workspace(&self.stores, thread_id, &ctx.claims.workspace_id).await?;

        let latest_seq = self.stores.messages.latest_seq(thread_id).await.map_err(BridgeError::Internal)?;
        if last_read_seq > latest_seq {
            return Err(BridgeError::InvalidArgument(format!(
                "last_read_seq {last_read_seq} exceeds latest_seq {latest_seq}"
            )));
        }

        let now = Utc::now();
        let cursor = self
            .stores
            .cursors
            .ack_read(thread_id, &ctx.claims.agent_id, last_read_seq, now)
            .await
            .map_err(BridgeError::Internal)?
            .ok_or_else(|| BridgeError::Conflict("last_read_seq regressed relative to stored cursor".into()))?;

        self.audit_success(
            ctx,
            "ack_read",
            "cursor",
            thread_id.as_str(),
            Some(thread_id.clone()),
            json!({ "last_read_seq": cursor.last_read_seq }),
        )
        .await;

        Ok(cursor)
    }
}
