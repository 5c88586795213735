use crate::server::app::AppState;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

pub async fn health_handler(State(_state): State<AppState>) -> Json<Value> {
    Json(json!({ "ok": true, "service": "agent-bridge", "now": Utc::now() }))
}
