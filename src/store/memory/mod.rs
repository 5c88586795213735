//! In-memory store implementations, for dispatcher/worker unit tests and
//! the end-to-end scenarios (§9: "tests supply alternate implementations").
//! All state lives behind `std::sync::Mutex`, mirroring the teacher's
//! `TestJobManager` (no tokio lock needed — every operation here is pure
//! in-memory bookkeeping, nothing is ever held across an `.await`).

use crate::domain::audit::AuditEvent;
use crate::domain::cursor::ParticipantCursor;
use crate::domain::message::{Message, PostMessagePayload};
use crate::domain::session::SessionRecord;
use crate::domain::thread::{ThreadRecord, ThreadStatus, ThreadType};
use crate::domain::trigger::{FallbackRun, FallbackRunStatus, TriggerAttempt, TriggerJob, TriggerStatus};
use crate::ids::{AgentId, MessageId, SessionId, ThreadId, TriggerId, WorkspaceId};
use crate::store::{AuditStore, Cas, CursorStore, MessageStore, SessionStore, ThreadStore, TriggerStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    threads: Mutex<HashMap<ThreadId, ThreadRecord>>,
    messages: Mutex<HashMap<ThreadId, Vec<Message>>>,
    cursors: Mutex<HashMap<(ThreadId, AgentId), ParticipantCursor>>,
    sessions: Mutex<HashMap<(AgentId, WorkspaceId), SessionRecord>>,
    triggers: Mutex<HashMap<TriggerId, TriggerJob>>,
    attempts: Mutex<HashMap<TriggerId, Vec<TriggerAttempt>>>,
    fallback_runs: Mutex<HashMap<TriggerId, FallbackRun>>,
    audit: Mutex<Vec<AuditEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ThreadStore for MemoryStore {
    async fn create_thread(
        &self,
        thread_id: &ThreadId,
        workspace_id: &WorkspaceId,
        title: &str,
        thread_type: ThreadType,
        participants: Vec<AgentId>,
        created_at: DateTime<Utc>,
    ) -> Result<ThreadRecord> {
        let record = ThreadRecord {
            thread_id: thread_id.clone(),
            workspace_id: workspace_id.clone(),
            title: title.to_string(),
            thread_type,
            status: ThreadStatus::Active,
            participants,
            escalation_owner_agent_id: None,
            escalation_assigned_by_agent_id: None,
            escalation_assigned_at: None,
            created_at,
            updated_at: created_at,
        };
        self.threads.lock().unwrap().insert(thread_id.clone(), record.clone());
        Ok(record)
    }

    async fn get_thread(&self, thread_id: &ThreadId) -> Result<Option<ThreadRecord>> {
        Ok(self.threads.lock().unwrap().get(thread_id).cloned())
    }

    async fn update_thread_status(
        &self,
        thread_id: &ThreadId,
        next: ThreadStatus,
        updated_at: DateTime<Utc>,
        expected_current: ThreadStatus,
    ) -> Result<Cas<ThreadRecord>> {
        let mut threads = self.threads.lock().unwrap();
        let Some(record) = threads.get_mut(thread_id) else {
            return Ok(None);
        };
        if record.status != expected_current {
            return Ok(None);
        }
        record.clear_escalation_if_leaving_blocked(next);
        record.status = next;
        record.updated_at = updated_at;
        Ok(Some(record.clone()))
    }

    async fn set_escalation_owner(
        &self,
        thread_id: &ThreadId,
        owner_agent_id: &AgentId,
        assigned_by: &AgentId,
        now: DateTime<Utc>,
        require_existing_owner: bool,
    ) -> Result<Cas<ThreadRecord>> {
        let mut threads = self.threads.lock().unwrap();
        let Some(record) = threads.get_mut(thread_id) else {
            return Ok(None);
        };
        if record.status != ThreadStatus::Blocked {
            return Ok(None);
        }
        let has_owner = record.escalation_owner_agent_id.is_some();
        if has_owner != require_existing_owner {
            return Ok(None);
        }
        record.escalation_owner_agent_id = Some(owner_agent_id.clone());
        record.escalation_assigned_by_agent_id = Some(assigned_by.clone());
        record.escalation_assigned_at = Some(now);
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn recent_messages_for_summary(&self, thread_id: &ThreadId, max_messages: usize) -> Result<Vec<Message>> {
        let messages = self.messages.lock().unwrap();
        let Some(list) = messages.get(thread_id) else {
            return Ok(vec![]);
        };
        let mut out: Vec<Message> = list.iter().rev().take(max_messages).cloned().collect();
        out.reverse();
        Ok(out)
    }
}

#[async_trait::async_trait]
impl MessageStore for MemoryStore {
    async fn latest_seq(&self, thread_id: &ThreadId) -> Result<i64> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(thread_id)
            .and_then(|v| v.last())
            .map(|m| m.seq)
            .unwrap_or(0))
    }

    async fn find_by_idempotency_key(
        &self,
        thread_id: &ThreadId,
        sender_agent_id: &AgentId,
        idempotency_key: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(thread_id)
            .and_then(|v| {
                v.iter()
                    .find(|m| &m.sender_agent_id == sender_agent_id && m.idempotency_key.as_deref() == Some(idempotency_key))
            })
            .cloned())
    }

    async fn get_message(&self, thread_id: &ThreadId, message_id: &MessageId) -> Result<Option<Message>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(thread_id)
            .and_then(|v| v.iter().find(|m| &m.message_id == message_id))
            .cloned())
    }

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
    ) -> Result<Option<Message>> {
        let mut messages = self.messages.lock().unwrap();
        let list = messages.entry(thread_id.clone()).or_default();
        if list.iter().any(|m| m.seq == seq) {
            return Ok(None);
        }
        if let Some(key) = idempotency_key {
            if list
                .iter()
                .any(|m| &m.sender_agent_id == sender_agent_id && m.idempotency_key.as_deref() == Some(key))
            {
                return Ok(None);
            }
        }
        let message = Message {
            message_id: message_id.clone(),
            thread_id: thread_id.clone(),
            schema_version: payload.schema_version,
            seq,
            sender_agent_id: sender_agent_id.clone(),
            sender_session_id: sender_session_id.cloned(),
            kind: payload.kind,
            body: payload.body.clone(),
            metadata: payload.metadata.clone(),
            in_reply_to: payload.in_reply_to.clone(),
            idempotency_key: idempotency_key.map(str::to_string),
            created_at,
        };
        list.push(message.clone());
        Ok(Some(message))
    }

    async fn read_messages(&self, thread_id: &ThreadId, since_seq: i64, limit: i64) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(thread_id)
            .map(|v| {
                v.iter()
                    .filter(|m| m.seq > since_seq)
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl CursorStore for MemoryStore {
    async fn get_cursor(&self, thread_id: &ThreadId, agent_id: &AgentId) -> Result<Option<ParticipantCursor>> {
        Ok(self.cursors.lock().unwrap().get(&(thread_id.clone(), agent_id.clone())).cloned())
    }

    async fn ack_read(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        last_read_seq: i64,
        now: DateTime<Utc>,
    ) -> Result<Cas<ParticipantCursor>> {
        let mut cursors = self.cursors.lock().unwrap();
        let key = (thread_id.clone(), agent_id.clone());
        if let Some(existing) = cursors.get(&key) {
            if last_read_seq < existing.last_read_seq {
                return Ok(None);
            }
        }
        let cursor = ParticipantCursor {
            thread_id: thread_id.clone(),
            agent_id: agent_id.clone(),
            last_read_seq,
            last_acked_message_id: None,
            updated_at: now,
        };
        cursors.insert(key, cursor.clone());
        Ok(Some(cursor))
    }

    async fn active_thread_cursors(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<(ThreadId, ParticipantCursor, i64, Option<AgentId>)>> {
        let threads = self.threads.lock().unwrap();
        let messages = self.messages.lock().unwrap();
        let cursors = self.cursors.lock().unwrap();
        let mut out = Vec::new();
        for thread in threads.values() {
            if &thread.workspace_id != workspace_id || thread.status != ThreadStatus::Active {
                continue;
            }
            let latest_seq = messages.get(&thread.thread_id).and_then(|v| v.last()).map(|m| m.seq).unwrap_or(0);
            for agent_id in &thread.participants {
                let cursor = cursors
                    .get(&(thread.thread_id.clone(), agent_id.clone()))
                    .cloned()
                    .unwrap_or(ParticipantCursor {
                        thread_id: thread.thread_id.clone(),
                        agent_id: agent_id.clone(),
                        last_read_seq: 0,
                        last_acked_message_id: None,
                        updated_at: thread.created_at,
                    });
                out.push((
                    thread.thread_id.clone(),
                    cursor,
                    latest_seq,
                    thread.escalation_owner_agent_id.clone(),
                ));
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    async fn heartbeat_upsert(&self, record: SessionRecord) -> Result<SessionRecord> {
        let mut sessions = self.sessions.lock().unwrap();
        let key = (record.agent_id.clone(), record.workspace_id.clone());
        match sessions.get(&key) {
            Some(existing) if existing.last_heartbeat_at > record.last_heartbeat_at => Ok(existing.clone()),
            _ => {
                sessions.insert(key, record.clone());
                Ok(record)
            }
        }
    }

    async fn get_session(&self, agent_id: &AgentId, workspace_id: &WorkspaceId) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.lock().unwrap().get(&(agent_id.clone(), workspace_id.clone())).cloned())
    }

    async fn list_sessions(&self, workspace_id: &WorkspaceId) -> Result<Vec<SessionRecord>> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| &s.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn mark_offline_if_stale(
        &self,
        agent_id: &AgentId,
        workspace_id: &WorkspaceId,
        now: DateTime<Utc>,
        stale_after_hours: i64,
    ) -> Result<bool> {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(record) = sessions.get_mut(&(agent_id.clone(), workspace_id.clone())) else {
            return Ok(false);
        };
        if record.status == crate::domain::session::SessionStatus::Offline {
            return Ok(false);
        }
        if !record.is_stale(now, stale_after_hours) {
            return Ok(false);
        }
        record.status = crate::domain::session::SessionStatus::Offline;
        record.updated_at = now;
        Ok(true)
    }
}

#[async_trait::async_trait]
impl TriggerStore for MemoryStore {
    async fn insert_or_get(&self, job: TriggerJob) -> Result<(TriggerJob, bool)> {
        let mut triggers = self.triggers.lock().unwrap();
        if let Some(existing) = triggers.get(&job.trigger_id) {
            return Ok((existing.clone(), false));
        }
        triggers.insert(job.trigger_id.clone(), job.clone());
        Ok((job, true))
    }

    async fn get(&self, trigger_id: &TriggerId) -> Result<Option<TriggerJob>> {
        Ok(self.triggers.lock().unwrap().get(trigger_id).cloned())
    }

    async fn count_pending_for_workspace(&self, workspace_id: &WorkspaceId) -> Result<i64> {
        Ok(self
            .triggers
            .lock()
            .unwrap()
            .values()
            .filter(|j| &j.workspace_id == workspace_id && !j.status.is_terminal())
            .count() as i64)
    }

    async fn find_non_terminal_for_reason(
        &self,
        workspace_id: &WorkspaceId,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        reason: &str,
    ) -> Result<Option<TriggerJob>> {
        Ok(self
            .triggers
            .lock()
            .unwrap()
            .values()
            .filter(|j| {
                &j.workspace_id == workspace_id
                    && &j.thread_id == thread_id
                    && &j.target_agent_id == agent_id
                    && j.reason == reason
                    && !j.status.is_terminal()
            })
            .max_by_key(|j| j.created_at)
            .cloned())
    }

    async fn recent_auto_triggers(&self, thread_id: &ThreadId, agent_id: &AgentId, limit: i64) -> Result<Vec<TriggerJob>> {
        let mut jobs: Vec<TriggerJob> = self
            .triggers
            .lock()
            .unwrap()
            .values()
            .filter(|j| {
                &j.thread_id == thread_id
                    && &j.target_agent_id == agent_id
                    && j.reason == crate::store::AUTO_UNREAD_REASON
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn reclaim_stale_leases(
        &self,
        workspace_id: &WorkspaceId,
        lease_timeout_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TriggerId, bool)>> {
        let mut triggers = self.triggers.lock().unwrap();
        let attempts = self.attempts.lock().unwrap();
        let mut reclaimed = Vec::new();
        for job in triggers.values_mut() {
            if &job.workspace_id != workspace_id || job.status != TriggerStatus::Triggering {
                continue;
            }
            let age = now - job.updated_at;
            if age < chrono::Duration::milliseconds(lease_timeout_ms) {
                continue;
            }
            let delivered = attempts
                .get(&job.trigger_id)
                .map(|a| a.iter().any(|x| x.attempt_result == crate::domain::trigger::AttemptResult::Delivered))
                .unwrap_or(false);
            job.status = if delivered { TriggerStatus::CallbackPending } else { TriggerStatus::Queued };
            job.updated_at = now;
            reclaimed.push((job.trigger_id.clone(), delivered));
        }
        Ok(reclaimed)
    }

    async fn claim_due_jobs(&self, workspace_id: &WorkspaceId, limit: i64, now: DateTime<Utc>) -> Result<Vec<TriggerJob>> {
        let mut triggers = self.triggers.lock().unwrap();
        let mut candidates: Vec<TriggerId> = triggers
            .values()
            .filter(|j| {
                &j.workspace_id == workspace_id
                    && j.status.is_claimable()
                    && j.next_retry_at.map(|t| t <= now).unwrap_or(true)
            })
            .map(|j| j.trigger_id.clone())
            .collect();
        candidates.sort_by_key(|id| {
            triggers.get(id).map(|j| j.created_at).unwrap_or(now)
        });
        candidates.truncate(limit.max(0) as usize);

        let mut claimed = Vec::new();
        for id in candidates {
            if let Some(job) = triggers.get_mut(&id) {
                job.status = TriggerStatus::Triggering;
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn transition(
        &self,
        trigger_id: &TriggerId,
        expected: TriggerStatus,
        next: TriggerStatus,
        attempts: i32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Cas<TriggerJob>> {
        let mut triggers = self.triggers.lock().unwrap();
        let Some(job) = triggers.get_mut(trigger_id) else {
            return Ok(None);
        };
        if job.status != expected {
            return Ok(None);
        }
        job.status = next;
        job.attempts = attempts;
        job.next_retry_at = next_retry_at;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn record_attempt(&self, attempt: TriggerAttempt) -> Result<()> {
        self.attempts.lock().unwrap().entry(attempt.trigger_id.clone()).or_default().push(attempt);
        Ok(())
    }

    async fn list_attempts(&self, trigger_id: &TriggerId) -> Result<Vec<TriggerAttempt>> {
        Ok(self.attempts.lock().unwrap().get(trigger_id).cloned().unwrap_or_default())
    }

    async fn recent_attempts_for_thread_agent(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        limit: i64,
    ) -> Result<Vec<TriggerAttempt>> {
        let triggers = self.triggers.lock().unwrap();
        let attempts = self.attempts.lock().unwrap();
        let matching_ids: Vec<TriggerId> = triggers
            .values()
            .filter(|j| &j.thread_id == thread_id && &j.target_agent_id == agent_id)
            .map(|j| j.trigger_id.clone())
            .collect();
        let mut all: Vec<TriggerAttempt> = matching_ids
            .iter()
            .filter_map(|id| attempts.get(id))
            .flatten()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    async fn upsert_fallback_run(&self, run: FallbackRun) -> Result<FallbackRun> {
        self.fallback_runs.lock().unwrap().insert(run.trigger_id.clone(), run.clone());
        Ok(run)
    }

    async fn get_fallback_run(&self, trigger_id: &TriggerId) -> Result<Option<FallbackRun>> {
        Ok(self.fallback_runs.lock().unwrap().get(trigger_id).cloned())
    }

    async fn list_running_fallback_runs(&self, workspace_id: &WorkspaceId) -> Result<Vec<FallbackRun>> {
        let triggers = self.triggers.lock().unwrap();
        Ok(self
            .fallback_runs
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.status == FallbackRunStatus::Running
                    && triggers.get(&r.trigger_id).map(|j| &j.workspace_id == workspace_id).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn update_fallback_run_status(
        &self,
        trigger_id: &TriggerId,
        status: FallbackRunStatus,
        ended_at: Option<DateTime<Utc>>,
        error_code: Option<&str>,
    ) -> Result<()> {
        if let Some(run) = self.fallback_runs.lock().unwrap().get_mut(trigger_id) {
            run.status = status;
            run.ended_at = ended_at;
            run.error_code = error_code.map(str::to_string);
        }
        Ok(())
    }

    async fn count_recent_resume_failures(
        &self,
        workspace_id: &WorkspaceId,
        agent_id: &AgentId,
        window_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let triggers = self.triggers.lock().unwrap();
        let attempts = self.attempts.lock().unwrap();
        let window = chrono::Duration::milliseconds(window_ms);
        let mut count = 0i64;
        for job in triggers.values() {
            if &job.workspace_id != workspace_id || &job.target_agent_id != agent_id {
                continue;
            }
            if let Some(list) = attempts.get(&job.trigger_id) {
                count += list
                    .iter()
                    .filter(|a| {
                        a.attempt_result == crate::domain::trigger::AttemptResult::FallbackResumeFailed
                            && now - a.created_at <= window
                    })
                    .count() as i64;
            }
        }
        Ok(count)
    }

    async fn find_jobs_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<TriggerJob>> {
        Ok(self
            .triggers
            .lock()
            .unwrap()
            .values()
            .filter(|j| &j.thread_id == thread_id)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl AuditStore for MemoryStore {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.audit.lock().unwrap().push(event);
        Ok(())
    }

    async fn list_for_thread(&self, thread_id: &ThreadId, limit: i64) -> Result<Vec<AuditEvent>> {
        Ok(self
            .audit
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| e.thread_id.as_ref() == Some(thread_id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::MessageKind;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new()
    }

    #[tokio::test]
    async fn create_and_fetch_thread_round_trips() {
        let s = store();
        let tid = ThreadId::from("t1");
        let wid = WorkspaceId::from("w1");
        let created = s
            .create_thread(&tid, &wid, "title", ThreadType::Conversation, vec![AgentId::from("a1")], Utc::now())
            .await
            .unwrap();
        assert_eq!(created.status, ThreadStatus::Active);
        let fetched = s.get_thread(&tid).await.unwrap().unwrap();
        assert_eq!(fetched.thread_id, tid);
    }

    #[tokio::test]
    async fn update_thread_status_cas_rejects_wrong_expected() {
        let s = store();
        let tid = ThreadId::from("t1");
        let wid = WorkspaceId::from("w1");
        s.create_thread(&tid, &wid, "title", ThreadType::Conversation, vec![], Utc::now()).await.unwrap();
        let result = s
            .update_thread_status(&tid, ThreadStatus::Resolved, Utc::now(), ThreadStatus::Blocked)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn message_try_insert_rejects_seq_conflict() {
        let s = store();
        let tid = ThreadId::from("t1");
        let payload = PostMessagePayload {
            schema_version: 1,
            kind: MessageKind::Chat,
            body: json!("hi"),
            metadata: json!({}),
            in_reply_to: None,
        };
        let m1 = s
            .try_insert(&MessageId::from("m1"), &tid, 1, &AgentId::from("a1"), None, &payload, None, Utc::now())
            .await
            .unwrap();
        assert!(m1.is_some());
        let m2 = s
            .try_insert(&MessageId::from("m2"), &tid, 1, &AgentId::from("a1"), None, &payload, None, Utc::now())
            .await
            .unwrap();
        assert!(m2.is_none());
    }

    #[tokio::test]
    async fn ack_read_rejects_regression() {
        let s = store();
        let tid = ThreadId::from("t1");
        let aid = AgentId::from("a1");
        s.ack_read(&tid, &aid, 5, Utc::now()).await.unwrap();
        let regressed = s.ack_read(&tid, &aid, 3, Utc::now()).await.unwrap();
        assert!(regressed.is_none());
    }

    #[tokio::test]
    async fn claim_due_jobs_moves_status_to_triggering() {
        let s = store();
        let job = TriggerJob {
            trigger_id: TriggerId::from("trg_1"),
            thread_id: ThreadId::from("t1"),
            workspace_id: WorkspaceId::from("w1"),
            target_agent_id: AgentId::from("a1"),
            target_session_id: None,
            reason: "manual".into(),
            prompt: "go".into(),
            status: TriggerStatus::Queued,
            attempts: 0,
            max_retries: 3,
            next_retry_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        s.insert_or_get(job.clone()).await.unwrap();
        let claimed = s.claim_due_jobs(&WorkspaceId::from("w1"), 10, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, TriggerStatus::Triggering);
    }
}
