//! Fallback executor: resume-then-spawn (spec §4.8).

use crate::adapters::launcher::{LaunchOutcome, RuntimeLauncher};
use crate::config::Config;
use crate::domain::session::SessionRecord;
use crate::domain::trigger::{AttemptResult, FallbackRun, FallbackRunStatus, LaunchMode, TriggerJob};
use crate::store::Stores;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

pub struct FallbackOutcome {
    pub attempt_result: AttemptResult,
    pub error_code: Option<&'static str>,
    pub pid: Option<i32>,
    /// True when the launcher returned before the child exited (detached);
    /// the job should move to `fallback_running` and be reconciled by the
    /// fallback run reconciler instead of going straight to `callback_pending`.
    pub still_running: bool,
}

pub struct FallbackExecutor {
    stores: Stores,
    launcher: Arc<dyn RuntimeLauncher>,
}

impl FallbackExecutor {
    pub fn new(stores: Stores, launcher: Arc<dyn RuntimeLauncher>) -> Self {
        Self { stores, launcher }
    }

    pub async fn execute(
        &self,
        job: &TriggerJob,
        session: Option<&SessionRecord>,
        config: &Config,
    ) -> Result<FallbackOutcome> {
        let now = Utc::now();

        let resume_eligible = match (&job.target_session_id, session) {
            (Some(target), Some(s)) if target == &s.session_id => {
                let stale = s.is_stale(now, config.session_stale_after_hours);
                let crash_count = self
                    .stores
                    .triggers
                    .count_recent_resume_failures(&job.workspace_id, &job.target_agent_id, config.crash_loop_window_ms, now)
                    .await?;
                !stale && crash_count < config.crash_loop_threshold
            }
            _ => false,
        };

        if resume_eligible {
            let session_id = session.expect("resume_eligible implies a session").session_id.clone();
            for _ in 0..config.resume_max_attempts.max(1) {
                match self.launcher.resume(&job.target_agent_id, &session_id).await {
                    LaunchOutcome::Started { pid, detached } => {
                        self.record_fallback_run(job, pid, LaunchMode::Resume, detached, config).await?;
                        return Ok(FallbackOutcome {
                            attempt_result: AttemptResult::FallbackResumeSucceeded,
                            error_code: None,
                            pid: Some(pid),
                            still_running: detached,
                        });
                    }
                    LaunchOutcome::Failed { .. } => continue,
                }
            }
        }

        let seed_prompt = format!("Resuming coordination in thread {}.", job.thread_id);
        match self.launcher.spawn(&job.target_agent_id, &job.thread_id, &seed_prompt).await {
            LaunchOutcome::Started { pid, detached } => {
                self.record_fallback_run(job, pid, LaunchMode::Spawn, detached, config).await?;
                Ok(FallbackOutcome { attempt_result: AttemptResult::FallbackSpawned, error_code: None, pid: Some(pid), still_running: detached })
            }
            LaunchOutcome::Failed { .. } => Ok(FallbackOutcome {
                attempt_result: AttemptResult::FallbackResumeFailed,
                error_code: Some("FALLBACK_SPAWN_FAILED"),
                pid: None,
                still_running: false,
            }),
        }
    }

    async fn record_fallback_run(&self, job: &TriggerJob, pid: i32, mode: LaunchMode, detached: bool, config: &Config) -> Result<()> {
        if !detached {
            return Ok(());
        }
        let now = Utc::now();
        self.stores
            .triggers
            .upsert_fallback_run(FallbackRun {
                trigger_id: job.trigger_id.clone(),
                pid,
                launch_mode: mode,
                status: FallbackRunStatus::Running,
                started_at: now,
                deadline_at: now + chrono::Duration::milliseconds(config.fallback_deadline_ms),
                ended_at: None,
                error_code: None,
            })
            .await?;
        Ok(())
    }
}
