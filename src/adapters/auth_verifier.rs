//! A static-map `AuthVerifier` for tests and local development. Production
//! deployments plug in real JWKS-backed verification; that is a stated
//! non-goal here (spec §1), so only the seam and a test double live in
//! this crate.

use crate::domain::auth::{AuthVerifier, Claims, Role};
use crate::ids::{AgentId, SessionId, WorkspaceId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Clone)]
pub struct StaticPrincipal {
    pub agent_id: AgentId,
    pub workspace_id: WorkspaceId,
    pub role: Role,
    pub session_id: Option<SessionId>,
}

/// Maps opaque bearer tokens straight to `Claims`, with no signature
/// verification. Intended for integration tests and local `bridge-server`
/// runs behind a trusted proxy.
#[derive(Default)]
pub struct StaticAuthVerifier {
    principals: RwLock<HashMap<String, StaticPrincipal>>,
}

impl StaticAuthVerifier {
    pub fn new() -> Self {
        Self { principals: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, token: impl Into<String>, principal: StaticPrincipal) {
        self.principals.write().unwrap().insert(token.into(), principal);
    }
}

#[async_trait]
impl AuthVerifier for StaticAuthVerifier {
    async fn verify(&self, bearer_token: &str) -> Option<Claims> {
        let principal = self.principals.read().unwrap().get(bearer_token).cloned()?;
        Some(Claims {
            agent_id: principal.agent_id,
            workspace_id: principal.workspace_id,
            role: principal.role,
            session_id: principal.session_id,
            jwt_id: bearer_token.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_token_fails_verification() {
        let verifier = StaticAuthVerifier::new();
        assert!(verifier.verify("nope").await.is_none());
    }

    #[tokio::test]
    async fn registered_token_resolves_to_claims() {
        let verifier = StaticAuthVerifier::new();
        verifier.register(
            "tok_1",
            StaticPrincipal {
                agent_id: AgentId::from("a1"),
                workspace_id: WorkspaceId::from("w1"),
                role: Role::Coordinator,
                session_id: None,
            },
        );
        let claims = verifier.verify("tok_1").await.unwrap();
        assert_eq!(claims.agent_id, AgentId::from("a1"));
        assert_eq!(claims.role, Role::Coordinator);
    }
}
