//! Trigger queue processor (spec §4.6): reclaim, claim, rate-limit,
//! loop-guard, dispatch by phase.

use crate::config::Config;
use crate::domain::thread::ThreadStatus;
use crate::domain::trigger::{compute_backoff_ms, AttemptResult, TriggerAttempt, TriggerJob, TriggerStatus};
use crate::ids::{AgentId, ThreadId, WorkspaceId};
use crate::store::Stores;
use crate::worker::callback::{CallbackStepOutcome, CallbackWorker};
use crate::worker::fallback_executor::FallbackExecutor;
use crate::worker::runtime_executor::RuntimeExecutor;
use anyhow::Result;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessReport {
    pub reclaimed: u64,
    pub claimed: u64,
    pub rate_limited: u64,
    pub auto_blocked: u64,
}

pub struct TriggerProcessor {
    stores: Stores,
    config: Arc<Config>,
    runtime_executor: Arc<RuntimeExecutor>,
    fallback_executor: Arc<FallbackExecutor>,
    callback_worker: Arc<CallbackWorker>,
}

impl TriggerProcessor {
    pub fn new(
        stores: Stores,
        config: Arc<Config>,
        runtime_executor: Arc<RuntimeExecutor>,
        fallback_executor: Arc<FallbackExecutor>,
        callback_worker: Arc<CallbackWorker>,
    ) -> Self {
        Self { stores, config, runtime_executor, fallback_executor, callback_worker }
    }

    pub async fn tick(&self, workspace_id: &WorkspaceId) -> Result<ProcessReport> {
        let mut report = ProcessReport::default();
        let now = Utc::now();

        let reclaimed = self.stores.triggers.reclaim_stale_leases(workspace_id, self.config.lease_timeout_ms, now).await?;
        report.reclaimed = reclaimed.len() as u64;
        for (trigger_id, routed_to_callback) in &reclaimed {
            tracing::warn!(trigger_id = %trigger_id, routed_to_callback, "reclaimed stale trigger lease");
        }

        let jobs = self.stores.triggers.claim_due_jobs(workspace_id, self.config.max_jobs_per_tick, now).await?;
        report.claimed = jobs.len() as u64;

        let mut rate_bucket: HashMap<(ThreadId, AgentId), i64> = HashMap::new();

        for job in jobs {
            let key = (job.thread_id.clone(), job.target_agent_id.clone());
            let count = rate_bucket.entry(key).or_insert(0);
            *count += 1;
            if *count > self.config.rate_limit_per_minute {
                report.rate_limited += 1;
                self.defer(&job, 60_000, "RATE_LIMITED").await?;
                continue;
            }

            if self.loop_guard_trips(&job).await? {
                report.auto_blocked += 1;
                continue;
            }

            if job.status.is_callback_phase() {
                self.process_callback_phase(&job).await?;
            } else {
                self.process_execution_phase(&job).await?;
            }
        }

        Ok(report)
    }

    async fn defer(&self, job: &TriggerJob, delay_ms: i64, error_code: &'static str) -> Result<()> {
        let now = Utc::now();
        self.stores
            .triggers
            .transition(
                &job.trigger_id,
                TriggerStatus::Triggering,
                TriggerStatus::Deferred,
                job.attempts,
                Some(now + chrono::Duration::milliseconds(delay_ms)),
                now,
            )
            .await?;
        self.stores
            .triggers
            .record_attempt(TriggerAttempt {
                trigger_id: job.trigger_id.clone(),
                attempt_no: job.attempts,
                attempt_result: AttemptResult::Deferred,
                error_code: Some(error_code.to_string()),
                details: Value::Null,
                created_at: now,
            })
            .await?;
        Ok(())
    }

    async fn loop_guard_trips(&self, job: &TriggerJob) -> Result<bool> {
        let recent = self
            .stores
            .triggers
            .recent_attempts_for_thread_agent(&job.thread_id, &job.target_agent_id, self.config.loop_max_turns)
            .await?;

        if recent.is_empty() {
            return Ok(false);
        }

        let repeated_findings_n = self.config.loop_max_repeated_findings as usize;
        let all_identical = recent.len() >= repeated_findings_n && {
            let sample = &recent[..repeated_findings_n];
            let first_code = &sample[0].error_code;
            first_code.is_some() && sample.iter().all(|a| &a.error_code == first_code)
        };

        let turns_n = self.config.loop_max_turns as usize;
        let all_thread_sample = recent.len() >= turns_n
            && recent[0].error_code.is_some()
            && recent.iter().all(|a| a.error_code == recent[0].error_code);

        if !all_identical && !all_thread_sample {
            return Ok(false);
        }

        let first_code = &recent[0].error_code;

        let thread = self.stores.threads.get_thread(&job.thread_id).await?;
        let Some(thread) = thread else { return Ok(false) };
        if thread.status == ThreadStatus::Active {
            let now = Utc::now();
            let _ = self.stores.threads.update_thread_status(&job.thread_id, ThreadStatus::Blocked, now, ThreadStatus::Active).await?;
        }

        self.stores
            .triggers
            .record_attempt(TriggerAttempt {
                trigger_id: job.trigger_id.clone(),
                attempt_no: job.attempts,
                attempt_result: AttemptResult::Failed,
                error_code: Some("THREAD_AUTO_BLOCKED".to_string()),
                details: json!({ "prior_outcome": { "error_code": first_code } }),
                created_at: Utc::now(),
            })
            .await?;

        Ok(true)
    }

    async fn process_execution_phase(&self, job: &TriggerJob) -> Result<()> {
        let now = Utc::now();
        let session = self.stores.sessions.get_session(&job.target_agent_id, &job.workspace_id).await?;

        let (attempt_result, error_code, retry_after_ms, details) = if matches!(job.status, TriggerStatus::FallbackResume | TriggerStatus::FallbackSpawn) {
            let outcome = self.fallback_executor.execute(job, session.as_ref(), &self.config).await?;
            if outcome.still_running {
                self.stores
                    .triggers
                    .transition(
                        &job.trigger_id,
                        TriggerStatus::Triggering,
                        TriggerStatus::FallbackRunning,
                        job.attempts + 1,
                        None,
                        now,
                    )
                    .await?;
                self.record(job, outcome.attempt_result, outcome.error_code, None, Value::Null).await?;
                return Ok(());
            }
            (outcome.attempt_result, outcome.error_code, None, json!({ "pid": outcome.pid }))
        } else {
            let timeout = Duration::from_millis(self.config.executor_timeout_ms as u64);
            match tokio::time::timeout(timeout, self.runtime_executor.execute(job, session.as_ref(), &self.config)).await {
                Ok(outcome) => (outcome.attempt_result, outcome.error_code, outcome.retry_after_ms, outcome.details),
                Err(_) => (AttemptResult::Failed, Some("TRIGGER_EXECUTOR_EXCEPTION"), None, Value::Null),
            }
        };

        self.record(job, attempt_result, error_code, None, details.clone()).await?;

        match attempt_result {
            AttemptResult::Delivered => {
                self.stores
                    .triggers
                    .transition(&job.trigger_id, TriggerStatus::Triggering, TriggerStatus::CallbackPending, job.attempts + 1, None, now)
                    .await?;
            }
            AttemptResult::Deferred | AttemptResult::Timeout if job.attempts + 1 < job.max_retries => {
                let backoff = retry_after_ms.unwrap_or_else(|| compute_backoff_ms(self.config.backoff_base_ms, job.attempts + 1, self.config.max_backoff_ms));
                let next_status = if attempt_result == AttemptResult::Timeout { TriggerStatus::Timeout } else { TriggerStatus::Deferred };
                self.stores
                    .triggers
                    .transition(
                        &job.trigger_id,
                        TriggerStatus::Triggering,
                        next_status,
                        job.attempts + 1,
                        Some(now + chrono::Duration::milliseconds(backoff)),
                        now,
                    )
                    .await?;
            }
            AttemptResult::Deferred | AttemptResult::Timeout | AttemptResult::Failed => {
                self.run_fallback_chain(job, session.as_ref(), now).await?;
            }
            AttemptResult::FallbackResumeSucceeded | AttemptResult::FallbackSpawned => {
                self.stores
                    .triggers
                    .transition(&job.trigger_id, TriggerStatus::Triggering, TriggerStatus::CallbackPending, job.attempts + 1, None, now)
                    .await?;
            }
            AttemptResult::FallbackResumeFailed => {
                self.stores
                    .triggers
                    .transition(&job.trigger_id, TriggerStatus::Triggering, TriggerStatus::Failed, job.attempts + 1, None, now)
                    .await?;
            }
        }

        Ok(())
    }

    async fn run_fallback_chain(
        &self,
        job: &TriggerJob,
        session: Option<&crate::domain::session::SessionRecord>,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let outcome = self.fallback_executor.execute(job, session, &self.config).await?;
        self.record(job, outcome.attempt_result, outcome.error_code, None, json!({ "pid": outcome.pid })).await?;

        if outcome.still_running {
            self.stores
                .triggers
                .transition(&job.trigger_id, TriggerStatus::Triggering, TriggerStatus::FallbackRunning, job.attempts + 1, None, now)
                .await?;
            return Ok(());
        }

        let next = match outcome.attempt_result {
            AttemptResult::FallbackResumeSucceeded | AttemptResult::FallbackSpawned => TriggerStatus::CallbackPending,
            _ => TriggerStatus::Failed,
        };
        self.stores.triggers.transition(&job.trigger_id, TriggerStatus::Triggering, next, job.attempts + 1, None, now).await?;
        Ok(())
    }

    async fn process_callback_phase(&self, job: &TriggerJob) -> Result<()> {
        let event_type = "trigger.completed";
        let outcome = self.callback_worker.run(job, event_type).await?;
        let now = Utc::now();

        match outcome {
            CallbackStepOutcome::Delivered => {
                self.stores
                    .triggers
                    .transition(&job.trigger_id, job.status, TriggerStatus::CallbackDelivered, job.attempts, None, now)
                    .await?;
            }
            CallbackStepOutcome::Retry { next_retry_at } if job.attempts + 1 < self.config.callback_max_attempts => {
                self.stores
                    .triggers
                    .transition(&job.trigger_id, job.status, TriggerStatus::CallbackRetry, job.attempts + 1, Some(next_retry_at), now)
                    .await?;
            }
            CallbackStepOutcome::Retry { .. } | CallbackStepOutcome::Failed => {
                self.stores
                    .triggers
                    .transition(&job.trigger_id, job.status, TriggerStatus::CallbackFailed, job.attempts + 1, None, now)
                    .await?;
            }
        }
        Ok(())
    }

    async fn record(
        &self,
        job: &TriggerJob,
        attempt_result: AttemptResult,
        error_code: Option<&'static str>,
        _retry_after_ms: Option<i64>,
        details: Value,
    ) -> Result<()> {
        self.stores
            .triggers
            .record_attempt(TriggerAttempt {
                trigger_id: job.trigger_id.clone(),
                attempt_no: job.attempts + 1,
                attempt_result,
                error_code: error_code.map(str::to_string),
                details,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}
