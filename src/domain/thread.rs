//! Thread entity and the status transition graph of spec §4.1.

use crate::ids::{AgentId, ThreadId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ThreadType {
    Conversation,
    Workflow,
    Incident,
}

impl ThreadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadType::Conversation => "conversation",
            ThreadType::Workflow => "workflow",
            ThreadType::Incident => "incident",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Blocked,
    Resolved,
    Closed,
}

impl ThreadStatus {
    /// The status transition graph of §4.1. Every edge not listed here
    /// fails with `INVALID_THREAD_TRANSITION`; authority gates on top of
    /// this (participant cannot close, blocked->closed needs an override)
    /// are enforced by the dispatcher, not here.
    pub fn can_transition_to(&self, next: ThreadStatus) -> bool {
        use ThreadStatus::*;
        matches!(
            (self, next),
            (Active, Blocked)
                | (Active, Resolved)
                | (Blocked, Active)
                | (Blocked, Resolved)
                | (Blocked, Closed)
                | (Resolved, Active)
                | (Resolved, Closed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Blocked => "blocked",
            ThreadStatus::Resolved => "resolved",
            ThreadStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThreadRecord {
    pub thread_id: ThreadId,
    pub workspace_id: WorkspaceId,
    pub title: String,
    pub thread_type: ThreadType,
    pub status: ThreadStatus,
    pub participants: Vec<AgentId>,
    pub escalation_owner_agent_id: Option<AgentId>,
    pub escalation_assigned_by_agent_id: Option<AgentId>,
    pub escalation_assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ThreadRecord {
    pub fn is_participant(&self, agent_id: &AgentId) -> bool {
        self.participants.contains(agent_id)
    }

    /// Transitioning out of `blocked` clears the three escalation fields
    /// (§3 Thread invariant).
    pub fn clear_escalation_if_leaving_blocked(&mut self, next: ThreadStatus) {
        if self.status == ThreadStatus::Blocked && next != ThreadStatus::Blocked {
            self.escalation_owner_agent_id = None;
            self.escalation_assigned_by_agent_id = None;
            self.escalation_assigned_at = None;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub message_count_considered: usize,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_can_go_blocked_or_resolved_only() {
        assert!(ThreadStatus::Active.can_transition_to(ThreadStatus::Blocked));
        assert!(ThreadStatus::Active.can_transition_to(ThreadStatus::Resolved));
        assert!(!ThreadStatus::Active.can_transition_to(ThreadStatus::Closed));
    }

    #[test]
    fn closed_is_terminal() {
        for next in [
            ThreadStatus::Active,
            ThreadStatus::Blocked,
            ThreadStatus::Resolved,
            ThreadStatus::Closed,
        ] {
            assert!(!ThreadStatus::Closed.can_transition_to(next));
        }
    }

    #[test]
    fn blocked_can_reach_closed() {
        assert!(ThreadStatus::Blocked.can_transition_to(ThreadStatus::Closed));
    }

    #[test]
    fn resolved_cannot_go_to_blocked_directly() {
        assert!(!ThreadStatus::Resolved.can_transition_to(ThreadStatus::Blocked));
    }
}
