//! Capability-trait store abstractions (spec §9 re-architecture note:
//! "interface abstraction... narrow capability set... tests supply
//! alternate implementations, no inheritance").
//!
//! Every store method that can race under concurrent writers is specified
//! to do so via a single SQL statement (compare-and-set, `FOR UPDATE SKIP
//! LOCKED`, `ON CONFLICT`) rather than read-then-write from Rust, per §5.

pub mod memory;
pub mod postgres;

use crate::domain::audit::AuditEvent;
use crate::domain::cursor::ParticipantCursor;
use crate::domain::message::{Message, PostMessagePayload};
use crate::domain::session::SessionRecord;
use crate::domain::thread::{ThreadRecord, ThreadStatus, ThreadType};
use crate::domain::trigger::{FallbackRun, FallbackRunStatus, TriggerAttempt, TriggerJob, TriggerStatus};
use crate::ids::{AgentId, MessageId, SessionId, ThreadId, TriggerId, WorkspaceId};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Outcome of a compare-and-set style store call: `None` means "the
/// expected precondition did not hold", which the dispatcher converts to
/// `CONFLICT` (§4.1 `update_thread_status`).
pub type Cas<T> = Option<T>;

#[async_trait::async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create_thread(
        &self,
        thread_id: &ThreadId,
        workspace_id: &WorkspaceId,
        title: &str,
        thread_type: ThreadType,
        participants: Vec<AgentId>,
        created_at: DateTime<Utc>,
    ) -> Result<ThreadRecord>;

    async fn get_thread(&self, thread_id: &ThreadId) -> Result<Option<ThreadRecord>>;

    /// Compare-and-set on `status`. `None` means no row existed with
    /// `status = expected_current` (§4.1).
    async fn update_thread_status(
        &self,
        thread_id: &ThreadId,
        next: ThreadStatus,
        updated_at: DateTime<Utc>,
        expected_current: ThreadStatus,
    ) -> Result<Cas<ThreadRecord>>;

    /// Operator control plane (§4.11): set the escalation owner. `None` if
    /// the thread isn't `blocked`. The `bool` distinguishes "assign"
    /// (requires no existing owner) from "reassign" (requires one);
    /// violating that invariant is a CAS miss (`None`), which the caller
    /// maps to `CONFLICT`.
    async fn set_escalation_owner(
        &self,
        thread_id: &ThreadId,
        owner_agent_id: &AgentId,
        assigned_by: &AgentId,
        now: DateTime<Utc>,
        require_existing_owner: bool,
    ) -> Result<Cas<ThreadRecord>>;

    /// Most recent `limit` messages for a thread, used by `summarize_thread`.
    async fn recent_messages_for_summary(
        &self,
        thread_id: &ThreadId,
        max_messages: usize,
    ) -> Result<Vec<Message>>;
}

#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    async fn latest_seq(&self, thread_id: &ThreadId) -> Result<i64>;

    async fn find_by_idempotency_key(
        &self,
        thread_id: &ThreadId,
        sender_agent_id: &AgentId,
        idempotency_key: &str,
    ) -> Result<Option<Message>>;

    async fn get_message(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
    ) -> Result<Option<Message>>;

    /// Attempt to insert at exactly `seq`. `Ok(None)` signals a unique
    /// constraint conflict on `(thread_id, seq)` or on the idempotency key
    /// — the caller re-checks idempotency and retries per §4.2 step 3.
    #[allow(clippy::too_many_arguments)]
    async fn try_insert(
        &self,
        message_id: &MessageId,
        thread_id: &ThreadId,
        seq: i64,
        sender_agent_id: &AgentId,
        sender_session_id: Option<&SessionId>,
        payload: &PostMessagePayload,
        idempotency_key: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<Option<Message>>;

    async fn read_messages(
        &self,
        thread_id: &ThreadId,
        since_seq: i64,
        limit: i64,
    ) -> Result<Vec<Message>>;
}

#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
    ) -> Result<Option<ParticipantCursor>>;

    /// `Ok(None)` means `last_read_seq` regressed relative to the stored
    /// value — the single-statement CAS analogue of §4.2's `ack_read`
    /// cursor-regression check.
    async fn ack_read(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        last_read_seq: i64,
        now: DateTime<Utc>,
    ) -> Result<Cas<ParticipantCursor>>;

    /// All participant cursors for every active thread in a workspace,
    /// for the unread reconciler (§4.5). Implementations join against
    /// `threads.status = active`.
    async fn active_thread_cursors(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<(ThreadId, ParticipantCursor, i64, Option<AgentId>)>>;
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Last-writer-wins upsert by `last_heartbeat_at` (§4.10). Returns the
    /// row as stored after the call (which may be the pre-existing row, if
    /// the incoming heartbeat was older).
    async fn heartbeat_upsert(&self, record: SessionRecord) -> Result<SessionRecord>;

    async fn get_session(
        &self,
        agent_id: &AgentId,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<SessionRecord>>;

    async fn list_sessions(&self, workspace_id: &WorkspaceId) -> Result<Vec<SessionRecord>>;

    /// Transition a non-offline, stale session to offline. Returns whether
    /// a transition happened (for the reconciler's counters).
    async fn mark_offline_if_stale(
        &self,
        agent_id: &AgentId,
        workspace_id: &WorkspaceId,
        now: DateTime<Utc>,
        stale_after_hours: i64,
    ) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait TriggerStore: Send + Sync {
    /// Insert-or-do-nothing + re-read (§4.4 step 5 / §9 "SQL semantics are
    /// authoritative"). The `bool` is true iff this call created the row.
    async fn insert_or_get(&self, job: TriggerJob) -> Result<(TriggerJob, bool)>;

    async fn get(&self, trigger_id: &TriggerId) -> Result<Option<TriggerJob>>;

    async fn count_pending_for_workspace(&self, workspace_id: &WorkspaceId) -> Result<i64>;

    async fn find_non_terminal_for_reason(
        &self,
        workspace_id: &WorkspaceId,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        reason: &str,
    ) -> Result<Option<TriggerJob>>;

    /// Most recent auto-trigger jobs for this (thread, agent) pair, newest
    /// first, for the leaky-bucket budget (§4.5).
    async fn recent_auto_triggers(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        limit: i64,
    ) -> Result<Vec<TriggerJob>>;

    /// Reclaim leases on rows stuck in `triggering` past `lease_timeout_ms`
    /// (§4.6 step 1). Returns the ids reclaimed and whether each was
    /// routed to `callback_pending` (a `delivered` attempt exists) or back
    /// to `queued`.
    async fn reclaim_stale_leases(
        &self,
        workspace_id: &WorkspaceId,
        lease_timeout_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TriggerId, bool)>>;

    /// Atomically claim up to `limit` due jobs via `FOR UPDATE SKIP LOCKED`
    /// (§4.6 step 2), moving them to `triggering`.
    async fn claim_due_jobs(
        &self,
        workspace_id: &WorkspaceId,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TriggerJob>>;

    /// CAS transition: only applies if the stored status still equals
    /// `expected`. `None` signals a lost race (another worker already
    /// transitioned it).
    async fn transition(
        &self,
        trigger_id: &TriggerId,
        expected: TriggerStatus,
        next: TriggerStatus,
        attempts: i32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Cas<TriggerJob>>;

    async fn record_attempt(&self, attempt: TriggerAttempt) -> Result<()>;

    async fn list_attempts(&self, trigger_id: &TriggerId) -> Result<Vec<TriggerAttempt>>;

    /// Most recent attempts for a (thread, agent) pair across all of that
    /// pair's trigger jobs, newest first — for the loop guard (§4.6).
    async fn recent_attempts_for_thread_agent(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        limit: i64,
    ) -> Result<Vec<TriggerAttempt>>;

    async fn upsert_fallback_run(&self, run: FallbackRun) -> Result<FallbackRun>;

    async fn get_fallback_run(&self, trigger_id: &TriggerId) -> Result<Option<FallbackRun>>;

    async fn list_running_fallback_runs(&self, workspace_id: &WorkspaceId) -> Result<Vec<FallbackRun>>;

    async fn update_fallback_run_status(
        &self,
        trigger_id: &TriggerId,
        status: FallbackRunStatus,
        ended_at: Option<DateTime<Utc>>,
        error_code: Option<&str>,
    ) -> Result<()>;

    /// Crash-loop counter for (workspace, agent): number of resume
    /// failures within the trailing window (§4.8).
    async fn count_recent_resume_failures(
        &self,
        workspace_id: &WorkspaceId,
        agent_id: &AgentId,
        window_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<i64>;

    /// Lookup by selector for `bridgectl fallback-kill` (§4.11).
    async fn find_jobs_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<TriggerJob>>;
}

#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    /// Audit writes are fire-and-forget from the caller's perspective
    /// (§7): a failure here is logged, never propagated as a request
    /// failure.
    async fn record(&self, event: AuditEvent) -> Result<()>;

    /// Read path backing `bridgectl inspect-thread` and the `auditor` role
    /// (§4 permission table), newest first.
    async fn list_for_thread(&self, thread_id: &ThreadId, limit: i64) -> Result<Vec<AuditEvent>>;
}

/// The bundle of store handles the dispatcher and worker are built from.
/// Grouping them behind `Arc` (rather than one god-trait) keeps each
/// capability independently mockable, per §9.
#[derive(Clone)]
pub struct Stores {
    pub threads: Arc<dyn ThreadStore>,
    pub messages: Arc<dyn MessageStore>,
    pub cursors: Arc<dyn CursorStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub triggers: Arc<dyn TriggerStore>,
    pub audit: Arc<dyn AuditStore>,
}

pub const AUTO_UNREAD_REASON: &str = "new_unread_dormant_participant";

/// `Value` alias kept local so call sites building attempt `details`
/// payloads don't need a direct `serde_json` import.
pub type Details = Value;
