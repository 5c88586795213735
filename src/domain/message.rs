//! Message entity and the append-only, densely-sequenced log of spec §3/§4.2.

use crate::ids::{AgentId, MessageId, SessionId, ThreadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    Event,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    pub schema_version: i32,
    pub seq: i64,
    pub sender_agent_id: AgentId,
    pub sender_session_id: Option<SessionId>,
    pub kind: MessageKind,
    pub body: Value,
    pub metadata: Value,
    pub in_reply_to: Option<MessageId>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The fields a replayed idempotency key must match exactly (§4.2 step 2).
#[derive(Debug, Clone, PartialEq)]
pub struct PostMessagePayload {
    pub schema_version: i32,
    pub kind: MessageKind,
    pub body: Value,
    pub metadata: Value,
    pub in_reply_to: Option<MessageId>,
}

impl Message {
    pub fn matches_payload(&self, payload: &PostMessagePayload) -> bool {
        self.schema_version == payload.schema_version
            && self.kind == payload.kind
            && self.body == payload.body
            && self.metadata == payload.metadata
            && self.in_reply_to == payload.in_reply_to
    }
}

/// Normalize metadata per kind (§4.2 step 1): for `event`, inject
/// `event_version = 1` if absent, and require `event_type`.
pub fn normalize_metadata(kind: MessageKind, mut metadata: Value) -> Result<Value, String> {
    if !metadata.is_object() {
        metadata = Value::Object(Default::default());
    }
    if kind == MessageKind::Event {
        let obj = metadata.as_object_mut().expect("forced object above");
        if !obj.contains_key("event_type") {
            return Err("metadata.event_type is required for kind=event".to_string());
        }
        match obj.get("event_version") {
            None => {
                obj.insert("event_version".to_string(), Value::from(1));
            }
            Some(v) => {
                let ok = v.as_i64().map(|n| n > 0).unwrap_or(false);
                if !ok {
                    return Err("metadata.event_version must be a positive integer".to_string());
                }
            }
        }
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_metadata_gets_default_version() {
        let meta = normalize_metadata(MessageKind::Event, json!({"event_type": "ping"})).unwrap();
        assert_eq!(meta["event_version"], json!(1));
    }

    #[test]
    fn event_metadata_requires_event_type() {
        let err = normalize_metadata(MessageKind::Event, json!({})).unwrap_err();
        assert!(err.contains("event_type"));
    }

    #[test]
    fn event_metadata_rejects_non_positive_version() {
        let err = normalize_metadata(
            MessageKind::Event,
            json!({"event_type": "ping", "event_version": 0}),
        )
        .unwrap_err();
        assert!(err.contains("event_version"));
    }

    #[test]
    fn chat_metadata_passes_through_unmodified() {
        let meta = normalize_metadata(MessageKind::Chat, json!({"foo": "bar"})).unwrap();
        assert_eq!(meta, json!({"foo": "bar"}));
    }

    #[test]
    fn matches_payload_is_deep_equality() {
        let m = Message {
            message_id: MessageId::from("m1"),
            thread_id: ThreadId::from("t1"),
            schema_version: 1,
            seq: 1,
            sender_agent_id: AgentId::from("a1"),
            sender_session_id: None,
            kind: MessageKind::Chat,
            body: json!("hello"),
            metadata: json!({}),
            in_reply_to: None,
            idempotency_key: Some("k1".into()),
            created_at: Utc::now(),
        };
        let matching = PostMessagePayload {
            schema_version: 1,
            kind: MessageKind::Chat,
            body: json!("hello"),
            metadata: json!({}),
            in_reply_to: None,
        };
        assert!(m.matches_payload(&matching));

        let mismatching = PostMessagePayload {
            body: json!("hi"),
            ..matching
        };
        assert!(!m.matches_payload(&mismatching));
    }
}
