use super::PostgresStore;
use crate::domain::message::{Message, PostMessagePayload};
use crate::ids::{AgentId, MessageId, SessionId, ThreadId};
use crate::store::MessageStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;

const MESSAGE_COLUMNS: &str = "message_id, thread_id, schema_version, seq, sender_agent_id, \
     sender_session_id, kind, body, metadata, in_reply_to, idempotency_key, created_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait::async_trait]
impl MessageStore for PostgresStore {
    async fn latest_seq(&self, thread_id: &ThreadId) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(seq), 0) AS max_seq FROM messages WHERE thread_id = $1")
            .bind(thread_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("max_seq")?)
    }

    async fn find_by_idempotency_key(
        &self,
        thread_id: &ThreadId,
        sender_agent_id: &AgentId,
        idempotency_key: &str,
    ) -> Result<Option<Message>> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE thread_id = $1 AND sender_agent_id = $2 AND idempotency_key = $3"
        );
        let msg = sqlx::query_as::<_, Message>(&query)
            .bind(thread_id)
            .bind(sender_agent_id)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(msg)
    }

    async fn get_message(&self, thread_id: &ThreadId, message_id: &MessageId) -> Result<Option<Message>> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE thread_id = $1 AND message_id = $2");
        let msg = sqlx::query_as::<_, Message>(&query)
            .bind(thread_id)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(msg)
    }

    async fn try_insert(
        &self,
        message_id: &MessageId,
        thread_id: &ThreadId,
        seq: i64,
        sender_agent_id: &AgentId,
        sender_session_id: Option<&SessionId>,
        payload: &PostMessagePayload,
        idempotency_key: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        let query = format!(
            r#"
            INSERT INTO messages (
                message_id, thread_id, schema_version, seq, sender_agent_id, sender_session_id,
                kind, body, metadata, in_reply_to, idempotency_key, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let result = sqlx::query_as::<_, Message>(&query)
            .bind(message_id)
            .bind(thread_id)
            .bind(payload.schema_version)
            .bind(seq)
            .bind(sender_agent_id)
            .bind(sender_session_id)
            .bind(payload.kind)
            .bind(&payload.body)
            .bind(&payload.metadata)
            .bind(&payload.in_reply_to)
            .bind(idempotency_key)
            .bind(created_at)
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(msg) => Ok(Some(msg)),
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_messages(&self, thread_id: &ThreadId, since_seq: i64, limit: i64) -> Result<Vec<Message>> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE thread_id = $1 AND seq > $2 ORDER BY seq ASC LIMIT $3"
        );
        let rows = sqlx::query_as::<_, Message>(&query)
            .bind(thread_id)
            .bind(since_seq)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
