//! Auto-trigger scheduling guards: circuit breaker, pending dedupe, and the
//! per-participant leaky bucket (spec §4.5).

use crate::config::Config;
use crate::domain::trigger::{resolve_trigger_decision, TriggerJob};
use crate::ids::{auto_unread_fingerprint, build_trigger_id, WorkspaceId};
use crate::store::{Stores, AUTO_UNREAD_REASON};
use crate::worker::unread_reconciler::UnreadCandidate;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct ScheduleReport {
    pub scheduled: u64,
    pub suppressed_by_breaker: u64,
    pub skipped_pending: u64,
    pub suppressed_by_budget: u64,
}

struct BreakerState {
    open_until: DateTime<Utc>,
}

pub struct AutoTriggerScheduler {
    stores: Stores,
    config: std::sync::Arc<Config>,
    breakers: Mutex<HashMap<WorkspaceId, BreakerState>>,
}

impl AutoTriggerScheduler {
    pub fn new(stores: Stores, config: std::sync::Arc<Config>) -> Self {
        Self { stores, config, breakers: Mutex::new(HashMap::new()) }
    }

    fn breaker_open(&self, workspace_id: &WorkspaceId, now: DateTime<Utc>) -> bool {
        self.breakers
            .lock()
            .unwrap()
            .get(workspace_id)
            .map(|b| now < b.open_until)
            .unwrap_or(false)
    }

    fn trip_breaker(&self, workspace_id: &WorkspaceId, now: DateTime<Utc>) {
        self.breakers.lock().unwrap().insert(
            workspace_id.clone(),
            BreakerState { open_until: now + chrono::Duration::milliseconds(self.config.breaker_cooldown_ms) },
        );
    }

    pub async fn schedule(
        &self,
        workspace_id: &WorkspaceId,
        candidates: Vec<UnreadCandidate>,
    ) -> Result<ScheduleReport> {
        let mut report = ScheduleReport::default();
        let now = Utc::now();

        let pending_count = self.stores.triggers.count_pending_for_workspace(workspace_id).await?;
        if pending_count >= self.config.breaker_backlog_threshold {
            self.trip_breaker(workspace_id, now);
        }

        for candidate in candidates {
            if self.breaker_open(workspace_id, now) {
                report.suppressed_by_breaker += 1;
                continue;
            }

            if self
                .stores
                .triggers
                .find_non_terminal_for_reason(workspace_id, &candidate.thread_id, &candidate.agent_id, AUTO_UNREAD_REASON)
                .await?
                .is_some()
            {
                report.skipped_pending += 1;
                continue;
            }

            let recent = self
                .stores
                .triggers
                .recent_auto_triggers(&candidate.thread_id, &candidate.agent_id, self.config.unread_max_triggers_per_window)
                .await?;

            if let Some(most_recent) = recent.first() {
                let since_last = now - most_recent.created_at;
                if since_last < chrono::Duration::milliseconds(self.config.unread_min_interval_ms) {
                    report.suppressed_by_budget += 1;
                    continue;
                }
            }
            let window_start = now - chrono::Duration::milliseconds(self.config.unread_window_ms);
            let within_window = recent.iter().filter(|j| j.created_at >= window_start).count() as i64;
            if within_window >= self.config.unread_max_triggers_per_window {
                report.suppressed_by_budget += 1;
                continue;
            }

            let fingerprint = auto_unread_fingerprint(workspace_id, &candidate.thread_id, &candidate.agent_id, candidate.latest_seq);
            let trigger_id = build_trigger_id(&fingerprint);

            let session = self.stores.sessions.get_session(&candidate.agent_id, workspace_id).await?;
            let decision = resolve_trigger_decision(session.as_ref(), now, self.config.session_stale_after_hours);

            let job = TriggerJob {
                trigger_id,
                thread_id: candidate.thread_id.clone(),
                workspace_id: workspace_id.clone(),
                target_agent_id: candidate.agent_id.clone(),
                target_session_id: session.map(|s| s.session_id),
                reason: AUTO_UNREAD_REASON.to_string(),
                prompt: format!("New unread activity in thread {} (seq {}).", candidate.thread_id, candidate.latest_seq),
                status: decision.initial_status,
                attempts: 0,
                max_retries: self.config.trigger_max_retries,
                next_retry_at: None,
                created_at: now,
                updated_at: now,
            };

            let (_, created) = self.stores.triggers.insert_or_get(job).await?;
            if created {
                report.scheduled += 1;
            } else {
                report.skipped_pending += 1;
            }
        }

        Ok(report)
    }
}
