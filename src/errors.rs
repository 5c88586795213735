//! The flat wire-visible error taxonomy of spec §7.
//!
//! Domain and store code returns `Result<T, BridgeError>`. The dispatcher
//! never needs a separate mapping step: `BridgeError` already carries its
//! HTTP status and wire `code`, and implements `IntoResponse` directly.
//! Adapter failures (PTY delivery, callback HTTP calls) are never allowed
//! to surface as a `BridgeError` — they are caught at the call site and
//! folded into typed attempt outcomes instead (see `worker`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("forbidden: {subcode}")]
    Forbidden { subcode: &'static str },

    #[error("resource belongs to a different workspace")]
    WorkspaceMismatch,

    #[error("not found")]
    NotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid thread transition from {from} to {to}")]
    InvalidThreadTransition { from: String, to: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("idempotency conflict")]
    IdempotencyConflict,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::WorkspaceMismatch => "WORKSPACE_MISMATCH",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::InvalidThreadTransition { .. } => "INVALID_THREAD_TRANSITION",
            Self::Conflict(_) => "CONFLICT",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::WorkspaceMismatch => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::InvalidThreadTransition { .. } => StatusCode::CONFLICT,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::IdempotencyConflict => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Forbidden { subcode } => Some(serde_json::json!({ "subcode": subcode })),
            Self::InvalidThreadTransition { from, to } => {
                Some(serde_json::json!({ "from": from, "to": to }))
            }
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorPayload,
    request_id: String,
    occurred_at: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct ErrorPayload {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Render a `BridgeError` into the wire envelope, tagging it with the
/// request id that the dispatcher's request-id middleware attached.
pub fn render(err: &BridgeError, request_id: &str) -> (StatusCode, Json<Value>) {
    let body = ErrorBody {
        error: ErrorPayload {
            code: err.code(),
            message: err.to_string(),
            details: err.details(),
        },
        request_id: request_id.to_string(),
        occurred_at: Utc::now(),
    };
    (err.status(), Json(serde_json::to_value(body).unwrap()))
}

/// Used when a `BridgeError` escapes without dispatcher-level request-id
/// context (e.g. auxiliary routes). Unknown/unhandled panics never reach
/// here directly — axum's own panic handling covers that — but any
/// `BridgeError` returned from a plain handler still needs a response.
impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, body) = render(&self, "unknown");
        (status, body).into_response()
    }
}
