//! Authenticated caller identity and the role permission table (spec §4.3
//! step 2). Token parsing and signature verification are out of scope
//! (§1 Non-goals) — `AuthVerifier` is the seam the dispatcher consumes; a
//! real deployment plugs in JWKS verification, tests plug in a static map.

use crate::ids::{AgentId, SessionId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Participant,
    Coordinator,
    Auditor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ThreadRead,
    ThreadManage,
    MessageRead,
    MessageWrite,
    SessionHeartbeat,
    AuditRead,
}

impl Role {
    /// The permission table of §4.3 step 2. `true` means allowed.
    pub fn allows(&self, op: Operation) -> bool {
        use Operation::*;
        use Role::*;
        match (self, op) {
            (Participant, ThreadRead) => true,
            (Participant, ThreadManage) => false,
            (Participant, MessageRead) => true,
            (Participant, MessageWrite) => true,
            (Participant, SessionHeartbeat) => true,
            (Participant, AuditRead) => false,

            (Coordinator, ThreadRead) => true,
            (Coordinator, ThreadManage) => true,
            (Coordinator, MessageRead) => true,
            (Coordinator, MessageWrite) => true,
            (Coordinator, SessionHeartbeat) => true,
            (Coordinator, AuditRead) => true,

            (Auditor, ThreadRead) => true,
            (Auditor, ThreadManage) => false,
            (Auditor, MessageRead) => true,
            (Auditor, MessageWrite) => false,
            (Auditor, SessionHeartbeat) => true,
            (Auditor, AuditRead) => true,
        }
    }
}

/// The resolved identity of an authenticated caller.
#[derive(Debug, Clone)]
pub struct Claims {
    pub agent_id: AgentId,
    pub workspace_id: WorkspaceId,
    pub role: Role,
    pub session_id: Option<SessionId>,
    pub jwt_id: String,
}

/// Resolves a bearer token into `Claims`. Token verification (signature,
/// issuer/audience, JWKS fetch) is a Non-goal; this trait is the interface
/// the dispatcher consumes.
#[async_trait::async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, bearer_token: &str) -> Option<Claims>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_cannot_manage_threads_or_read_audit() {
        assert!(!Role::Participant.allows(Operation::ThreadManage));
        assert!(!Role::Participant.allows(Operation::AuditRead));
    }

    #[test]
    fn auditor_cannot_write_messages_or_manage_threads() {
        assert!(!Role::Auditor.allows(Operation::MessageWrite));
        assert!(!Role::Auditor.allows(Operation::ThreadManage));
    }

    #[test]
    fn coordinator_allows_everything() {
        for op in [
            Operation::ThreadRead,
            Operation::ThreadManage,
            Operation::MessageRead,
            Operation::MessageWrite,
            Operation::SessionHeartbeat,
            Operation::AuditRead,
        ] {
            assert!(Role::Coordinator.allows(op));
        }
    }
}
