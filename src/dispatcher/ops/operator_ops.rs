//! Operator control-plane commands (spec §4.11), invoked directly by
//! `bridgectl` against the stores. There is no bearer token in an operator
//! shell, so this bypasses the HTTP dispatch pipeline's `RequestContext`
//! entirely rather than faking one.

use crate::domain::audit::{AuditEvent, AuditResult};
use crate::domain::thread::{ThreadRecord, ThreadStatus};
use crate::domain::trigger::{is_override_reason, FallbackRun, FallbackRunStatus, TriggerStatus};
use crate::errors::BridgeError;
use crate::ids::{AgentId, ThreadId, TriggerId, WorkspaceId};
use crate::store::Stores;
use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::json;
use std::time::Duration;

pub enum FallbackSelector {
    Trigger(TriggerId),
    Thread(ThreadId),
}

pub struct OperatorOps {
    stores: Stores,
}

impl OperatorOps {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn inspect_thread(&self, thread_id: &ThreadId) -> Result<ThreadRecord, BridgeError> {
        self.load(thread_id).await
    }

    pub async fn escalate_thread(&self, thread_id: &ThreadId, actor_agent_id: &AgentId) -> Result<ThreadRecord, BridgeError> {
        self.transition(thread_id, ThreadStatus::Blocked, actor_agent_id, None).await
    }

    /// The current escalation owner may drop blocked→active without an
    /// override prefix; everyone else needs one (§4.11 owner-based bypass).
    pub async fn unblock_thread(&self, thread_id: &ThreadId, actor_agent_id: &AgentId, reason: Option<&str>) -> Result<ThreadRecord, BridgeError> {
        let thread = self.load(thread_id).await?;
        let is_owner = thread.escalation_owner_agent_id.as_ref() == Some(actor_agent_id);
        let has_override = reason.map(is_override_reason).unwrap_or(false);
        if thread.status == ThreadStatus::Blocked && !is_owner && !has_override {
            return Err(BridgeError::Forbidden { subcode: "MISSING_UNBLOCK_OVERRIDE" });
        }
        self.transition(thread_id, ThreadStatus::Active, actor_agent_id, reason).await
    }

    pub async fn override_close_thread(&self, thread_id: &ThreadId, actor_agent_id: &AgentId, reason: &str) -> Result<ThreadRecord, BridgeError> {
        if !is_override_reason(reason) {
            return Err(BridgeError::Forbidden { subcode: "MISSING_CLOSE_OVERRIDE" });
        }
        self.transition(thread_id, ThreadStatus::Closed, actor_agent_id, Some(reason)).await
    }

    pub async fn assign_owner(&self, thread_id: &ThreadId, owner_agent_id: &AgentId, assigned_by: &AgentId) -> Result<ThreadRecord, BridgeError> {
        self.set_owner(thread_id, owner_agent_id, assigned_by, false).await
    }

    pub async fn reassign_owner(&self, thread_id: &ThreadId, owner_agent_id: &AgentId, assigned_by: &AgentId) -> Result<ThreadRecord, BridgeError> {
        self.set_owner(thread_id, owner_agent_id, assigned_by, true).await
    }

    pub async fn get_escalation_owner(&self, thread_id: &ThreadId) -> Result<Option<AgentId>, BridgeError> {
        Ok(self.load(thread_id).await?.escalation_owner_agent_id)
    }

    pub async fn fallback_list(&self, workspace_id: &WorkspaceId) -> Result<Vec<FallbackRun>, BridgeError> {
        self.stores.triggers.list_running_fallback_runs(workspace_id).await.map_err(BridgeError::Internal)
    }

    /// SIGTERM, wait `grace_ms`, SIGKILL if still alive; roll the job
    /// forward to `callback_pending` with the operator-terminated code.
    pub async fn fallback_kill(&self, selector: FallbackSelector, grace_ms: u64) -> Result<Vec<TriggerId>, BridgeError> {
        let jobs = match selector {
            FallbackSelector::Trigger(id) => {
                let job = self.stores.triggers.get(&id).await.map_err(BridgeError::Internal)?.ok_or(BridgeError::NotFound)?;
                vec![job]
            }
            FallbackSelector::Thread(thread_id) => {
                self.stores.triggers.find_jobs_by_thread(&thread_id).await.map_err(BridgeError::Internal)?
            }
        };

        let mut killed = Vec::new();
        for job in jobs {
            if job.status != TriggerStatus::FallbackRunning {
                continue;
            }
            let Some(run) = self.stores.triggers.get_fallback_run(&job.trigger_id).await.map_err(BridgeError::Internal)? else {
                continue;
            };

            let pid = Pid::from_raw(run.pid);
            let _ = signal::kill(pid, Signal::SIGTERM);
            tokio::time::sleep(Duration::from_millis(grace_ms)).await;
            let still_alive = signal::kill(pid, None).is_ok();
            let status = if still_alive {
                let _ = signal::kill(pid, Signal::SIGKILL);
                FallbackRunStatus::Killed
            } else {
                FallbackRunStatus::Orphaned
            };

            let now = Utc::now();
            self.stores
                .triggers
                .update_fallback_run_status(&job.trigger_id, status, Some(now), Some("OPERATOR_TERMINATED_FALLBACK"))
                .await
                .map_err(BridgeError::Internal)?;
            self.stores
                .triggers
                .transition(&job.trigger_id, TriggerStatus::FallbackRunning, TriggerStatus::CallbackPending, job.attempts, None, now)
                .await
                .map_err(BridgeError::Internal)?;
            killed.push(job.trigger_id);
        }
        Ok(killed)
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<ThreadRecord, BridgeError> {
        self.stores.threads.get_thread(thread_id).await.map_err(BridgeError::Internal)?.ok_or(BridgeError::NotFound)
    }

    async fn transition(&self, thread_id: &ThreadId, next: ThreadStatus, actor_agent_id: &AgentId, reason: Option<&str>) -> Result<ThreadRecord, BridgeError> {
        let thread = self.load(thread_id).await?;
        if !thread.status.can_transition_to(next) {
            return Err(BridgeError::InvalidThreadTransition { from: thread.status.as_str().to_string(), to: next.as_str().to_string() });
        }

        let now = Utc::now();
        let updated = self
            .stores
            .threads
            .update_thread_status(thread_id, next, now, thread.status)
            .await
            .map_err(BridgeError::Internal)?
            .ok_or_else(|| BridgeError::Conflict("thread status changed concurrently".into()))?;

        self.stores
            .audit
            .record(AuditEvent {
                workspace_id: updated.workspace_id.clone(),
                actor_agent_id: Some(actor_agent_id.clone()),
                actor_role: Some("operator".to_string()),
                operation: "operator_transition".to_string(),
                resource_type: "thread".to_string(),
                resource_id: thread_id.as_str().to_string(),
                thread_id: Some(thread_id.clone()),
                request_id: None,
                result: AuditResult::Success,
                payload: json!({ "from": thread.status.as_str(), "to": next.as_str(), "reason": reason }),
                created_at: now,
            })
            .await
            .map_err(BridgeError::Internal)?;

        Ok(updated)
    }
}
