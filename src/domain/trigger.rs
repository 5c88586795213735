//! Trigger job state machine (spec §3/§4.4/§4.6/§4.8/§4.9).
//!
//! Tagged-variant outcome encoding per the redesign note in §9, instead of
//! ad-hoc booleans scattered across the job row.

use crate::domain::session::{ManagementMode, SessionRecord, SessionStatus};
use crate::ids::{AgentId, SessionId, ThreadId, TriggerId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const HUMAN_OVERRIDE_PREFIX: &str = "human_override:";
pub const COORDINATOR_OVERRIDE_PREFIX: &str = "coordinator_override:";

pub fn is_override_reason(reason: &str) -> bool {
    reason.starts_with(HUMAN_OVERRIDE_PREFIX) || reason.starts_with(COORDINATOR_OVERRIDE_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Queued,
    Triggering,
    Deferred,
    Timeout,
    Failed,
    FallbackResume,
    FallbackSpawn,
    FallbackRunning,
    CallbackPending,
    CallbackRetry,
    CallbackDelivered,
    CallbackFailed,
}

impl TriggerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CallbackDelivered | Self::CallbackFailed)
    }

    /// Non-terminal statuses eligible for claim by the queue processor
    /// (§4.6 step 2).
    pub fn is_claimable(&self) -> bool {
        matches!(
            self,
            Self::Queued
                | Self::Timeout
                | Self::Deferred
                | Self::FallbackResume
                | Self::FallbackSpawn
                | Self::CallbackPending
                | Self::CallbackRetry
        )
    }

    pub fn is_execution_phase(&self) -> bool {
        matches!(
            self,
            Self::Queued
                | Self::Timeout
                | Self::Deferred
                | Self::FallbackResume
                | Self::FallbackSpawn
        )
    }

    pub fn is_callback_phase(&self) -> bool {
        matches!(self, Self::CallbackPending | Self::CallbackRetry)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Triggering => "triggering",
            Self::Deferred => "deferred",
            Self::Timeout => "timeout",
            Self::Failed => "failed",
            Self::FallbackResume => "fallback_resume",
            Self::FallbackSpawn => "fallback_spawn",
            Self::FallbackRunning => "fallback_running",
            Self::CallbackPending => "callback_pending",
            Self::CallbackRetry => "callback_retry",
            Self::CallbackDelivered => "callback_delivered",
            Self::CallbackFailed => "callback_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TriggerJob {
    pub trigger_id: TriggerId,
    pub thread_id: ThreadId,
    pub workspace_id: WorkspaceId,
    pub target_agent_id: AgentId,
    pub target_session_id: Option<SessionId>,
    pub reason: String,
    pub prompt: String,
    pub status: TriggerStatus,
    pub attempts: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TriggerJob {
    pub fn is_override(&self) -> bool {
        is_override_reason(&self.reason)
    }

    /// §4.4 step 5: does the stored job's payload match a replayed request
    /// exactly?
    pub fn matches_replay(
        &self,
        thread_id: &ThreadId,
        workspace_id: &WorkspaceId,
        target_agent_id: &AgentId,
        reason: &str,
        prompt: &str,
    ) -> bool {
        &self.thread_id == thread_id
            && &self.workspace_id == workspace_id
            && &self.target_agent_id == target_agent_id
            && self.reason == reason
            && self.prompt == prompt
    }
}

/// What `resolve_trigger_decision` (§4.4 step 4 / §4.5 "Scheduling uses the
/// same rule") decided to do, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    TriggerRuntime,
    FallbackRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    ResumeSession,
    SpawnSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerDecision {
    pub action: TriggerAction,
    pub fallback: Option<FallbackAction>,
    pub initial_status: TriggerStatus,
}

/// §4.4 step 4 / §4.5: decide whether to deliver straight to a managed
/// runtime or fall back to resume/spawn.
pub fn resolve_trigger_decision(
    session: Option<&SessionRecord>,
    now: DateTime<Utc>,
    stale_after_hours: i64,
) -> TriggerDecision {
    let Some(session) = session else {
        return TriggerDecision {
            action: TriggerAction::FallbackRequired,
            fallback: Some(FallbackAction::SpawnSession),
            initial_status: TriggerStatus::FallbackSpawn,
        };
    };

    let stale = session.is_stale(now, stale_after_hours);

    if session.management_mode == ManagementMode::Managed
        && session.status != SessionStatus::Offline
        && !stale
    {
        return TriggerDecision {
            action: TriggerAction::TriggerRuntime,
            fallback: None,
            initial_status: TriggerStatus::Queued,
        };
    }

    if session.resumable && !stale {
        TriggerDecision {
            action: TriggerAction::FallbackRequired,
            fallback: Some(FallbackAction::ResumeSession),
            initial_status: TriggerStatus::FallbackResume,
        }
    } else {
        TriggerDecision {
            action: TriggerAction::FallbackRequired,
            fallback: Some(FallbackAction::SpawnSession),
            initial_status: TriggerStatus::FallbackSpawn,
        }
    }
}

/// Tagged execution outcome, replacing ad-hoc booleans (§9 redesign note).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Delivered,
    Deferred,
    Timeout,
    Failed,
    FallbackResumeSucceeded,
    FallbackSpawned,
    FallbackResumeFailed,
}

impl AttemptResult {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Deferred | Self::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TriggerAttempt {
    pub trigger_id: TriggerId,
    pub attempt_no: i32,
    pub attempt_result: AttemptResult,
    pub error_code: Option<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    Resume,
    Spawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FallbackRunStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
    Killed,
    Orphaned,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FallbackRun {
    pub trigger_id: TriggerId,
    pub pid: i32,
    pub launch_mode: LaunchMode,
    pub status: FallbackRunStatus,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
}

/// Exponential backoff with a base clamped to `max_backoff_ms`, per §4.6
/// step 4. `attempts` is 1-based (the attempt just recorded).
pub fn compute_backoff_ms(base_ms: i64, attempts: i32, max_backoff_ms: i64) -> i64 {
    let exp = attempts.max(1) - 1;
    let factor: i64 = 1i64.checked_shl(exp.min(32) as u32).unwrap_or(i64::MAX);
    base_ms.saturating_mul(factor).min(max_backoff_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(mode: ManagementMode, status: SessionStatus, resumable: bool) -> SessionRecord {
        SessionRecord {
            agent_id: AgentId::from("a1"),
            workspace_id: WorkspaceId::from("w1"),
            session_id: SessionId::from("s1"),
            runtime: "tmux:foo".into(),
            management_mode: mode,
            resumable,
            status,
            last_heartbeat_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn no_session_falls_back_to_spawn() {
        let d = resolve_trigger_decision(None, Utc::now(), 12);
        assert_eq!(d.action, TriggerAction::FallbackRequired);
        assert_eq!(d.fallback, Some(FallbackAction::SpawnSession));
        assert_eq!(d.initial_status, TriggerStatus::FallbackSpawn);
    }

    #[test]
    fn managed_online_session_triggers_runtime() {
        let s = session(ManagementMode::Managed, SessionStatus::Active, true);
        let d = resolve_trigger_decision(Some(&s), Utc::now(), 12);
        assert_eq!(d.action, TriggerAction::TriggerRuntime);
        assert_eq!(d.initial_status, TriggerStatus::Queued);
    }

    #[test]
    fn managed_offline_resumable_session_falls_back_to_resume() {
        let s = session(ManagementMode::Managed, SessionStatus::Offline, true);
        let d = resolve_trigger_decision(Some(&s), Utc::now(), 12);
        assert_eq!(d.fallback, Some(FallbackAction::ResumeSession));
        assert_eq!(d.initial_status, TriggerStatus::FallbackResume);
    }

    #[test]
    fn unmanaged_non_resumable_session_falls_back_to_spawn() {
        let s = session(ManagementMode::Unmanaged, SessionStatus::Idle, false);
        let d = resolve_trigger_decision(Some(&s), Utc::now(), 12);
        assert_eq!(d.fallback, Some(FallbackAction::SpawnSession));
    }

    #[test]
    fn stale_session_never_triggers_runtime_even_if_managed_and_active() {
        let mut s = session(ManagementMode::Managed, SessionStatus::Active, true);
        s.last_heartbeat_at = Utc::now() - chrono::Duration::hours(48);
        let d = resolve_trigger_decision(Some(&s), Utc::now(), 12);
        assert_eq!(d.action, TriggerAction::FallbackRequired);
        assert_eq!(d.fallback, Some(FallbackAction::SpawnSession));
    }

    #[test]
    fn override_prefixes_are_recognized() {
        assert!(is_override_reason("human_override: escalate now"));
        assert!(is_override_reason("coordinator_override: policy"));
        assert!(!is_override_reason("routine check"));
    }

    #[test]
    fn backoff_grows_exponentially_and_clamps() {
        assert_eq!(compute_backoff_ms(1000, 1, 60_000), 1000);
        assert_eq!(compute_backoff_ms(1000, 2, 60_000), 2000);
        assert_eq!(compute_backoff_ms(1000, 3, 60_000), 4000);
        assert_eq!(compute_backoff_ms(1000, 20, 60_000), 60_000);
    }
}
