//! Unread reconciliation, the scanning half of spec §4.5. Produces
//! candidates; `AutoTriggerScheduler` applies the scheduling guards.

use crate::config::Config;
use crate::ids::{AgentId, ThreadId, WorkspaceId};
use crate::store::Stores;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct UnreadCandidate {
    pub thread_id: ThreadId,
    pub agent_id: AgentId,
    pub latest_seq: i64,
}

pub struct UnreadReconciler {
    stores: Stores,
    config: Arc<Config>,
}

impl UnreadReconciler {
    pub fn new(stores: Stores, config: Arc<Config>) -> Self {
        Self { stores, config }
    }

    /// Scan every participant cursor on every active thread in the
    /// workspace and return the deduplicated candidate set.
    pub async fn scan(&self, workspace_id: &WorkspaceId) -> Result<Vec<UnreadCandidate>> {
        let rows = self.stores.cursors.active_thread_cursors(workspace_id).await?;

        let mut latest_sender_by_thread: HashMap<ThreadId, Option<AgentId>> = HashMap::new();
        let mut best: HashMap<(ThreadId, AgentId), UnreadCandidate> = HashMap::new();

        for (thread_id, cursor, latest_seq, _escalation_owner) in rows {
            let unread_count = latest_seq - cursor.last_read_seq;
            if unread_count <= 0 {
                continue;
            }

            let latest_sender = match latest_sender_by_thread.get(&thread_id) {
                Some(sender) => sender.clone(),
                None => {
                    let recent = self.stores.threads.recent_messages_for_summary(&thread_id, 1).await?;
                    let sender = recent.first().map(|m| m.sender_agent_id.clone());
                    latest_sender_by_thread.insert(thread_id.clone(), sender.clone());
                    sender
                }
            };
            if latest_sender.as_ref() == Some(&cursor.agent_id) {
                continue;
            }

            let session = self.stores.sessions.get_session(&cursor.agent_id, workspace_id).await?;
            let is_dormant = match &session {
                None => true,
                Some(s) => {
                    s.status != crate::domain::session::SessionStatus::Active
                        || s.is_stale(chrono::Utc::now(), self.config.session_stale_after_hours)
                }
            };
            if !is_dormant {
                continue;
            }

            let key = (thread_id.clone(), cursor.agent_id.clone());
            let candidate = UnreadCandidate { thread_id: thread_id.clone(), agent_id: cursor.agent_id.clone(), latest_seq };
            match best.get(&key) {
                Some(existing) if existing.latest_seq >= latest_seq => {}
                _ => {
                    best.insert(key, candidate);
                }
            }
        }

        Ok(best.into_values().collect())
    }
}
