//! Managed-runtime delivery executor (spec §4.7): validates the session,
//! enforces the per-(workspace, agent, runtime) collision gate, then calls
//! the PTY adapter.

use crate::adapters::pty::{encode_payload, DeliverOutcome, DeliverRequest, PtyAdapter};
use crate::config::Config;
use crate::domain::session::{ManagementMode, SessionRecord, SessionStatus};
use crate::domain::trigger::{is_override_reason, AttemptResult, TriggerJob};
use crate::ids::{AgentId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct ExecutionOutcome {
    pub attempt_result: AttemptResult,
    pub error_code: Option<&'static str>,
    pub retry_after_ms: Option<i64>,
    pub details: Value,
}

pub struct RuntimeExecutor {
    pty: Arc<dyn PtyAdapter>,
    last_busy_at: Mutex<HashMap<(WorkspaceId, AgentId, String), DateTime<Utc>>>,
}

impl RuntimeExecutor {
    pub fn new(pty: Arc<dyn PtyAdapter>) -> Self {
        Self { pty, last_busy_at: Mutex::new(HashMap::new()) }
    }

    pub async fn execute(&self, job: &TriggerJob, session: Option<&SessionRecord>, config: &Config) -> ExecutionOutcome {
        let is_override = is_override_reason(&job.reason);

        let Some(session) = session else {
            return ExecutionOutcome {
                attempt_result: AttemptResult::Failed,
                error_code: Some("RUNTIME_NOT_FOUND"),
                retry_after_ms: None,
                details: force_override_audit(is_override, false, "not_evaluated"),
            };
        };

        if let Some(target) = &job.target_session_id {
            if target != &session.session_id {
                return ExecutionOutcome {
                    attempt_result: AttemptResult::Failed,
                    error_code: Some("RUNTIME_SESSION_MISMATCH"),
                    retry_after_ms: None,
                    details: force_override_audit(is_override, false, "not_evaluated"),
                };
            }
        }

        if session.management_mode != ManagementMode::Managed {
            return ExecutionOutcome {
                attempt_result: AttemptResult::Failed,
                error_code: Some("RUNTIME_UNMANAGED"),
                retry_after_ms: None,
                details: force_override_audit(is_override, false, "not_evaluated"),
            };
        }

        if session.status == SessionStatus::Offline {
            return ExecutionOutcome {
                attempt_result: AttemptResult::Timeout,
                error_code: Some("RUNTIME_OFFLINE"),
                retry_after_ms: None,
                details: force_override_audit(is_override, false, "not_evaluated"),
            };
        }

        let key = (job.workspace_id.clone(), job.target_agent_id.clone(), session.runtime.clone());
        let now = Utc::now();

        let quiet_active = self
            .last_busy_at
            .lock()
            .unwrap()
            .get(&key)
            .map(|last| now - *last < chrono::Duration::milliseconds(config.quiet_window_ms))
            .unwrap_or(false);

        if quiet_active && !is_override {
            if now - job.created_at >= chrono::Duration::milliseconds(config.max_defer_ms) {
                return ExecutionOutcome {
                    attempt_result: AttemptResult::Timeout,
                    error_code: Some("DEFER_TIMEOUT"),
                    retry_after_ms: None,
                    details: force_override_audit(is_override, false, "enforced"),
                };
            }
            return ExecutionOutcome {
                attempt_result: AttemptResult::Deferred,
                error_code: Some("OPERATOR_BUSY"),
                retry_after_ms: Some(config.recheck_ms),
                details: force_override_audit(is_override, false, "enforced"),
            };
        }

        let gate_note = if quiet_active && is_override { "bypassed" } else { "not_evaluated" };

        let encoded = match encode_payload(&job.trigger_id, &job.thread_id, &job.reason, &job.prompt, config.pty_max_payload_bytes) {
            Ok(p) => p,
            Err(e) => {
                return ExecutionOutcome {
                    attempt_result: AttemptResult::Failed,
                    error_code: Some(e.code()),
                    retry_after_ms: None,
                    details: force_override_audit(is_override, false, gate_note),
                };
            }
        };

        let outcome = self
            .pty
            .deliver(DeliverRequest {
                runtime: session.runtime.clone(),
                trigger_id: job.trigger_id.clone(),
                thread_id: job.thread_id.clone(),
                reason: job.reason.clone(),
                prompt: encoded,
                force_override: is_override,
            })
            .await;

        match outcome {
            DeliverOutcome::Delivered { details } => {
                self.last_busy_at.lock().unwrap().remove(&key);
                ExecutionOutcome {
                    attempt_result: AttemptResult::Delivered,
                    error_code: None,
                    retry_after_ms: None,
                    details: merge_override_audit(details, is_override, true, gate_note),
                }
            }
            DeliverOutcome::Failed { error_code: "OPERATOR_BUSY", details } => {
                self.last_busy_at.lock().unwrap().insert(key, now);
                if now - job.created_at >= chrono::Duration::milliseconds(config.max_defer_ms) {
                    ExecutionOutcome {
                        attempt_result: AttemptResult::Timeout,
                        error_code: Some("DEFER_TIMEOUT"),
                        retry_after_ms: None,
                        details: merge_override_audit(details, is_override, false, gate_note),
                    }
                } else {
                    ExecutionOutcome {
                        attempt_result: AttemptResult::Deferred,
                        error_code: Some("OPERATOR_BUSY"),
                        retry_after_ms: Some(config.recheck_ms),
                        details: merge_override_audit(details, is_override, false, gate_note),
                    }
                }
            }
            DeliverOutcome::Failed { error_code: code @ ("TARGET_NOT_FOUND" | "PANE_DEAD" | "SEND_KEYS_ERROR"), details } => {
                ExecutionOutcome {
                    attempt_result: AttemptResult::Timeout,
                    error_code: Some(code),
                    retry_after_ms: None,
                    details: merge_override_audit(details, is_override, false, gate_note),
                }
            }
            DeliverOutcome::Failed { error_code, details } => ExecutionOutcome {
                attempt_result: AttemptResult::Failed,
                error_code: Some(error_code),
                retry_after_ms: None,
                details: merge_override_audit(details, is_override, false, gate_note),
            },
        }
    }
}

fn force_override_audit(requested: bool, applied: bool, collision_gate: &'static str) -> Value {
    merge_override_audit(None, requested, applied, collision_gate)
}

fn merge_override_audit(details: Option<Value>, requested: bool, applied: bool, collision_gate: &'static str) -> Value {
    let mut base = details.unwrap_or(Value::Object(Default::default()));
    if !requested {
        return base;
    }
    if let Some(obj) = base.as_object_mut() {
        obj.insert(
            "force_override_audit".to_string(),
            json!({
                "requested": requested,
                "applied": applied,
                "intent": "bypass_collision_gate",
                "reason_prefix": "override",
                "collision_gate": collision_gate,
            }),
        );
    }
    base
}
