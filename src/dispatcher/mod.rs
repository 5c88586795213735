//! The request dispatcher pipeline (spec §4.3): authenticate happens in
//! server middleware; everything from "authorize operation" onward lives
//! here so it's exercised the same way in unit tests as in production.

pub mod ops;

use crate::config::Config;
use crate::domain::audit::{AuditEvent, AuditResult};
use crate::domain::auth::{Claims, Operation, Role};
use crate::errors::BridgeError;
use crate::ids::{AgentId, SessionId, ThreadId, WorkspaceId};
use crate::store::Stores;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

/// Per-request context threaded explicitly through dispatcher calls,
/// rather than stashed on a framework-provided dynamic field (§9
/// re-architecture note).
#[derive(Clone)]
pub struct RequestContext {
    pub claims: Claims,
    pub request_id: String,
}

#[derive(Clone)]
pub struct Dispatcher {
    pub stores: Stores,
    pub config: Arc<Config>,
}

impl Dispatcher {
    pub fn new(stores: Stores, config: Arc<Config>) -> Self {
        Self { stores, config }
    }

    pub fn authorize(&self, role: Role, op: Operation) -> Result<(), BridgeError> {
        if role.allows(op) {
            Ok(())
        } else {
            Err(BridgeError::Forbidden { subcode: "ROLE_DENIED" })
        }
    }

    /// §4.3 step 3: a body-supplied `agent_id`/`session_id` hint must match
    /// the authenticated claim.
    pub fn check_identity_hint<T: PartialEq>(claim_value: &T, hint: Option<&T>) -> Result<(), BridgeError> {
        match hint {
            Some(h) if h != claim_value => Err(BridgeError::Forbidden { subcode: "CLAIM_MISMATCH" }),
            _ => Ok(()),
        }
    }

    /// §4.3 step 4: the loaded resource's workspace must match the caller's.
    pub fn check_workspace(claim_workspace: &WorkspaceId, resource_workspace: &WorkspaceId) -> Result<(), BridgeError> {
        if claim_workspace == resource_workspace {
            Ok(())
        } else {
            Err(BridgeError::WorkspaceMismatch)
        }
    }

    async fn audit(&self, ctx: &RequestContext, entry: AuditDraft) {
        let event = AuditEvent {
            workspace_id: ctx.claims.workspace_id.clone(),
            actor_agent_id: Some(ctx.claims.agent_id.clone()),
            actor_role: Some(format!("{:?}", ctx.claims.role)),
            operation: entry.operation.to_string(),
            resource_type: entry.resource_type.to_string(),
            resource_id: entry.resource_id,
            thread_id: entry.thread_id,
            request_id: Some(ctx.request_id.clone()),
            result: entry.result,
            payload: entry.payload,
            created_at: Utc::now(),
        };
        if let Err(e) = self.stores.audit.record(event).await {
            tracing::error!(error = %e, operation = entry.operation, "audit write failed");
        }
    }

    async fn audit_success(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        resource_type: &'static str,
        resource_id: impl Into<String>,
        thread_id: Option<ThreadId>,
        payload: Value,
    ) {
        self.audit(
            ctx,
            AuditDraft {
                operation,
                resource_type,
                resource_id: resource_id.into(),
                thread_id,
                result: AuditResult::Success,
                payload,
            },
        )
        .await;
    }

    async fn audit_rejected(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        resource_type: &'static str,
        resource_id: impl Into<String>,
        thread_id: Option<ThreadId>,
        payload: Value,
    ) {
        self.audit(
            ctx,
            AuditDraft {
                operation,
                resource_type,
                resource_id: resource_id.into(),
                thread_id,
                result: AuditResult::Rejected,
                payload,
            },
        )
        .await;
    }
}

struct AuditDraft {
    operation: &'static str,
    resource_type: &'static str,
    resource_id: String,
    thread_id: Option<ThreadId>,
    result: AuditResult,
    payload: Value,
}

/// Shared helper: load a thread and enforce the workspace boundary, mapping
/// "missing" to `NOT_FOUND` (§4.3 step 4).
pub(crate) async fn load_thread_in_workspace(
    stores: &Stores,
    thread_id: &ThreadId,
    workspace_id: &WorkspaceId,
) -> Result<crate::domain::thread::ThreadRecord, BridgeError> {
    let thread = stores
        .threads
        .get_thread(thread_id)
        .await
        .map_err(BridgeError::Internal)?
        .ok_or(BridgeError::NotFound)?;
    Dispatcher::check_workspace(workspace_id, &thread.workspace_id)?;
    Ok(thread)
}

pub(crate) fn identity_hint_agent(claim: &AgentId, hint: Option<&AgentId>) -> Result<(), BridgeError> {
    Dispatcher::check_identity_hint(claim, hint)
}

pub(crate) fn identity_hint_session(claim: Option<&SessionId>, hint: Option<&SessionId>) -> Result<(), BridgeError> {
    match (claim, hint) {
        (Some(c), Some(h)) if c != h => Err(BridgeError::Forbidden { subcode: "CLAIM_MISMATCH" }),
        _ => Ok(()),
    }
}
