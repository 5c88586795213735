//! The single dispatch endpoint: `POST /v1/mcp/<operation>` (spec §6).
//! Each operation parses its own request DTO, calls the matching
//! `Dispatcher` method, and renders the documented success shape.

use crate::dispatcher::ops::{CreateThreadInput, HeartbeatInput, PostMessageInput, TriggerParticipantInput};
use crate::dispatcher::RequestContext;
use crate::domain::auth::Claims;
use crate::domain::message::MessageKind;
use crate::domain::session::{ManagementMode, SessionStatus};
use crate::domain::thread::{ThreadStatus, ThreadType};
use crate::errors::{render, BridgeError};
use crate::ids::{AgentId, MessageId, SessionId, ThreadId};
use crate::server::app::AppState;
use crate::server::middleware::request_id::RequestId;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;

pub async fn dispatch(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    Extension(claims): Extension<Claims>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<Value>,
) -> Response {
    let ctx = RequestContext { claims, request_id: request_id.0.clone() };
    let started = Instant::now();

    let result = run_operation(&state, &ctx, &operation, body).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    state.metrics.record_request(operation_label(&operation), elapsed_ms, result.is_err());

    match result {
        Ok(value) => Json(value).into_response(),
        Err(err) => {
            let (status, body) = render(&err, &ctx.request_id);
            (status, body).into_response()
        }
    }
}

/// Metrics labels are `&'static str`; operation names come from a fixed,
/// known set, so interning via match (not leaking unknown input) keeps
/// the counter table bounded.
fn operation_label(operation: &str) -> &'static str {
    match operation {
        "create_thread" => "create_thread",
        "get_thread" => "get_thread",
        "update_thread_status" => "update_thread_status",
        "summarize_thread" => "summarize_thread",
        "post_message" => "post_message",
        "read_messages" => "read_messages",
        "ack_read" => "ack_read",
        "heartbeat_session" => "heartbeat_session",
        "trigger_participant" => "trigger_participant",
        _ => "unknown_operation",
    }
}

async fn run_operation(state: &AppState, ctx: &RequestContext, operation: &str, body: Value) -> Result<Value, BridgeError> {
    match operation {
        "create_thread" => create_thread(state, ctx, body).await,
        "get_thread" => get_thread(state, ctx, body).await,
        "update_thread_status" => update_thread_status(state, ctx, body).await,
        "summarize_thread" => summarize_thread(state, ctx, body).await,
        "post_message" => post_message(state, ctx, body).await,
        "read_messages" => read_messages(state, ctx, body).await,
        "ack_read" => ack_read(state, ctx, body).await,
        "heartbeat_session" => heartbeat_session(state, ctx, body).await,
        "trigger_participant" => trigger_participant(state, ctx, body).await,
        other => Err(BridgeError::InvalidArgument(format!("unknown operation {other}"))),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, BridgeError> {
    serde_json::from_value(body).map_err(|e| BridgeError::InvalidArgument(e.to_string()))
}

#[derive(Deserialize)]
struct CreateThreadRequest {
    title: String,
    #[serde(rename = "type")]
    thread_type: ThreadType,
    #[serde(default)]
    participants: Vec<AgentId>,
}

async fn create_thread(state: &AppState, ctx: &RequestContext, body: Value) -> Result<Value, BridgeError> {
    let req: CreateThreadRequest = parse(body)?;
    let thread = state
        .dispatcher
        .create_thread(ctx, CreateThreadInput { title: req.title, thread_type: req.thread_type, participants: req.participants })
        .await?;
    Ok(json!({ "thread_id": thread.thread_id, "status": thread.status.as_str(), "created_at": thread.created_at }))
}

#[derive(Deserialize)]
struct ThreadIdRequest {
    thread_id: ThreadId,
}

async fn get_thread(state: &AppState, ctx: &RequestContext, body: Value) -> Result<Value, BridgeError> {
    let req: ThreadIdRequest = parse(body)?;
    let thread = state.dispatcher.get_thread(ctx, &req.thread_id).await?;
    Ok(serde_json::to_value(thread).expect("ThreadRecord always serializes"))
}

#[derive(Deserialize)]
struct UpdateThreadStatusRequest {
    thread_id: ThreadId,
    next: ThreadStatus,
    #[serde(default)]
    reason: Option<String>,
}

async fn update_thread_status(state: &AppState, ctx: &RequestContext, body: Value) -> Result<Value, BridgeError> {
    let req: UpdateThreadStatusRequest = parse(body)?;
    let thread = state.dispatcher.update_thread_status(ctx, &req.thread_id, req.next, req.reason.as_deref()).await?;
    Ok(json!({ "thread_id": thread.thread_id, "status": thread.status.as_str(), "updated_at": thread.updated_at }))
}

#[derive(Deserialize)]
struct SummarizeThreadRequest {
    thread_id: ThreadId,
    #[serde(default = "default_summary_messages")]
    max_messages: usize,
}

fn default_summary_messages() -> usize {
    20
}

async fn summarize_thread(state: &AppState, ctx: &RequestContext, body: Value) -> Result<Value, BridgeError> {
    let req: SummarizeThreadRequest = parse(body)?;
    let summary = state.dispatcher.summarize_thread(ctx, &req.thread_id, req.max_messages).await?;
    Ok(serde_json::to_value(summary).expect("ThreadSummary always serializes"))
}

#[derive(Deserialize)]
struct PostMessageRequest {
    thread_id: ThreadId,
    schema_version: i32,
    kind: MessageKind,
    body: Value,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    in_reply_to: Option<MessageId>,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    sender_agent_id: Option<AgentId>,
    #[serde(default)]
    sender_session_id: Option<SessionId>,
}

async fn post_message(state: &AppState, ctx: &RequestContext, body: Value) -> Result<Value, BridgeError> {
    let req: PostMessageRequest = parse(body)?;
    let thread_id = req.thread_id.clone();
    let message = state
        .dispatcher
        .post_message(
            ctx,
            PostMessageInput {
                thread_id: req.thread_id,
                schema_version: req.schema_version,
                kind: req.kind,
                body: req.body,
                metadata: req.metadata,
                in_reply_to: req.in_reply_to,
                idempotency_key: req.idempotency_key,
                sender_agent_id_hint: req.sender_agent_id,
                sender_session_id_hint: req.sender_session_id,
            },
        )
        .await?;

    let thread = state.dispatcher.get_thread(ctx, &thread_id).await?;
    Ok(json!({
        "message_id": message.message_id,
        "seq": message.seq,
        "thread_status": thread.status.as_str(),
        "created_at": message.created_at,
    }))
}

#[derive(Deserialize)]
struct ReadMessagesRequest {
    thread_id: ThreadId,
    #[serde(default)]
    since_seq: i64,
    #[serde(default = "default_read_limit")]
    limit: i64,
    #[serde(default)]
    agent_id: Option<AgentId>,
}

fn default_read_limit() -> i64 {
    100
}

async fn read_messages(state: &AppState, ctx: &RequestContext, body: Value) -> Result<Value, BridgeError> {
    let req: ReadMessagesRequest = parse(body)?;
    let result = state
        .dispatcher
        .read_messages(ctx, &req.thread_id, req.since_seq, req.limit, req.agent_id.as_ref())
        .await?;
    Ok(json!({ "messages": result.messages, "next_seq": result.next_seq, "has_more": result.has_more }))
}

#[derive(Deserialize)]
struct AckReadRequest {
    thread_id: ThreadId,
    last_read_seq: i64,
    #[serde(default)]
    agent_id: Option<AgentId>,
}

async fn ack_read(state: &AppState, ctx: &RequestContext, body: Value) -> Result<Value, BridgeError> {
    let req: AckReadRequest = parse(body)?;
    let cursor = state.dispatcher.ack_read(ctx, &req.thread_id, req.last_read_seq, req.agent_id.as_ref()).await?;
    Ok(json!({ "ok": true, "updated_at": cursor.updated_at }))
}

#[derive(Deserialize)]
struct HeartbeatSessionRequest {
    session_id: SessionId,
    runtime: String,
    management_mode: ManagementMode,
    resumable: bool,
    status: SessionStatus,
    #[serde(default)]
    agent_id: Option<AgentId>,
    #[serde(default)]
    workspace_id: Option<crate::ids::WorkspaceId>,
}

async fn heartbeat_session(state: &AppState, ctx: &RequestContext, body: Value) -> Result<Value, BridgeError> {
    let req: HeartbeatSessionRequest = parse(body)?;
    let session = state
        .dispatcher
        .heartbeat_session(
            ctx,
            HeartbeatInput {
                session_id: req.session_id,
                runtime: req.runtime,
                management_mode: req.management_mode,
                resumable: req.resumable,
                status: req.status,
                agent_id_hint: req.agent_id,
                workspace_id_hint: req.workspace_id,
            },
        )
        .await?;
    Ok(json!({ "ok": true, "recorded_at": session.last_heartbeat_at }))
}

#[derive(Deserialize)]
struct TriggerParticipantRequest {
    thread_id: ThreadId,
    target_agent_id: AgentId,
    reason: String,
    trigger_prompt: String,
}

/// Recover the `(action, fallback_action)` pair `resolve_trigger_decision`
/// picked from the stored job's status, for the wire response (§4.4 step 5
/// "return the decision").
fn decision_fields(status: crate::domain::trigger::TriggerStatus) -> (&'static str, Option<&'static str>) {
    use crate::domain::trigger::TriggerStatus::*;
    match status {
        Queued => ("trigger_runtime", None),
        FallbackResume => ("fallback_required", Some("resume_session")),
        FallbackSpawn => ("fallback_required", Some("spawn_session")),
        _ => ("fallback_required", None),
    }
}

async fn trigger_participant(state: &AppState, ctx: &RequestContext, body: Value) -> Result<Value, BridgeError> {
    let req: TriggerParticipantRequest = parse(body)?;
    let outcome = state
        .dispatcher
        .trigger_participant(
            ctx,
            &ctx.request_id,
            TriggerParticipantInput {
                thread_id: req.thread_id,
                target_agent_id: req.target_agent_id.clone(),
                reason: req.reason,
                trigger_prompt: req.trigger_prompt,
            },
        )
        .await?;

    let job = outcome.job;
    let (action, fallback_action) = decision_fields(job.status);

    let session = state
        .dispatcher
        .stores
        .sessions
        .get_session(&req.target_agent_id, &ctx.claims.workspace_id)
        .await
        .map_err(BridgeError::Internal)?;
    let stale_session = session
        .as_ref()
        .map(|s| s.is_stale(chrono::Utc::now(), state.dispatcher.config.session_stale_after_hours))
        .unwrap_or(false);

    Ok(json!({
        "trigger_id": outcome.trigger_id,
        "target_agent_id": req.target_agent_id,
        "action": action,
        "result": if outcome.created { "created" } else { "replayed" },
        "job_status": job.status.as_str(),
        "fallback_action": fallback_action,
        "target_session_id": job.target_session_id,
        "runtime": session.as_ref().map(|s| s.runtime.clone()),
        "management_mode": session.as_ref().map(|s| s.management_mode),
        "session_status": session.as_ref().map(|s| s.status),
        "stale_session": stale_session,
        "triggered_at": job.created_at,
    }))
}
