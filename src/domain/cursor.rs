//! Participant cursor entity (spec §3/§4.2).

use crate::ids::{AgentId, MessageId, ThreadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ParticipantCursor {
    pub thread_id: ThreadId,
    pub agent_id: AgentId,
    pub last_read_seq: i64,
    pub last_acked_message_id: Option<MessageId>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_fields_round_trip_through_json() {
        let c = ParticipantCursor {
            thread_id: ThreadId::from("t1"),
            agent_id: AgentId::from("a1"),
            last_read_seq: 4,
            last_acked_message_id: None,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: ParticipantCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.last_read_seq, 4);
    }
}
