//! Fallback run reconciler (spec §4.9): SIGTERM, grace period, SIGKILL.

use crate::domain::trigger::{FallbackRunStatus, TriggerStatus};
use crate::ids::WorkspaceId;
use crate::store::Stores;
use anyhow::Result;
use chrono::Utc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileReport {
    pub killed: u64,
    pub orphaned: u64,
}

pub struct FallbackReconciler {
    stores: Stores,
    grace_ms: u64,
    orphan_grace_ms: i64,
}

impl FallbackReconciler {
    pub fn new(stores: Stores, grace_ms: u64, orphan_grace_ms: i64) -> Self {
        Self { stores, grace_ms, orphan_grace_ms }
    }

    pub async fn tick(&self, workspace_id: &WorkspaceId) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let now = Utc::now();
        let running = self.stores.triggers.list_running_fallback_runs(workspace_id).await?;

        for run in running {
            if now >= run.deadline_at {
                let pid = Pid::from_raw(run.pid);
                let _ = signal::kill(pid, Signal::SIGTERM);
                tokio::time::sleep(Duration::from_millis(self.grace_ms)).await;
                let still_alive = signal::kill(pid, None).is_ok();
                let status = if still_alive {
                    let _ = signal::kill(pid, Signal::SIGKILL);
                    FallbackRunStatus::Killed
                } else {
                    FallbackRunStatus::TimedOut
                };

                self.stores
                    .triggers
                    .update_fallback_run_status(&run.trigger_id, status, Some(now), None)
                    .await?;
                self.transition_to_callback_pending(&run.trigger_id).await?;
                report.killed += 1;
                continue;
            }

            let alive = signal::kill(Pid::from_raw(run.pid), None).is_ok();
            if !alive {
                let grace_elapsed = now - run.started_at >= chrono::Duration::milliseconds(self.orphan_grace_ms);
                if grace_elapsed {
                    self.stores
                        .triggers
                        .update_fallback_run_status(&run.trigger_id, FallbackRunStatus::Orphaned, Some(now), None)
                        .await?;
                    self.transition_to_callback_pending(&run.trigger_id).await?;
                    report.orphaned += 1;
                }
            }
        }

        Ok(report)
    }

    async fn transition_to_callback_pending(&self, trigger_id: &crate::ids::TriggerId) -> Result<()> {
        let job = self.stores.triggers.get(trigger_id).await?;
        let Some(job) = job else { return Ok(()) };
        if job.status == TriggerStatus::FallbackRunning {
            self.stores
                .triggers
                .transition(trigger_id, TriggerStatus::FallbackRunning, TriggerStatus::CallbackPending, job.attempts, None, Utc::now())
                .await?;
        }
        Ok(())
    }
}
