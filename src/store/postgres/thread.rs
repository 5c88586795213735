use super::PostgresStore;
use crate::domain::thread::{ThreadRecord, ThreadStatus, ThreadType};
use crate::ids::{AgentId, ThreadId, WorkspaceId};
use crate::store::{Cas, ThreadStore};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Participants live in their own junction table (§6 persisted-state list),
/// so every read pulls them back via this subquery rather than an array
/// column on `threads`.
const THREAD_SELECT: &str = r#"
    SELECT
        t.thread_id, t.workspace_id, t.title, t.thread_type, t.status,
        COALESCE((
            SELECT array_agg(tp.agent_id ORDER BY tp.agent_id)
            FROM thread_participants tp
            WHERE tp.thread_id = t.thread_id
        ), ARRAY[]::text[]) AS participants,
        t.escalation_owner_agent_id, t.escalation_assigned_by_agent_id, t.escalation_assigned_at,
        t.created_at, t.updated_at
    FROM threads t
"#;

#[async_trait::async_trait]
impl ThreadStore for PostgresStore {
    async fn create_thread(
        &self,
        thread_id: &ThreadId,
        workspace_id: &WorkspaceId,
        title: &str,
        thread_type: ThreadType,
        participants: Vec<AgentId>,
        created_at: DateTime<Utc>,
    ) -> Result<ThreadRecord> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO threads (thread_id, workspace_id, title, thread_type, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'active', $5, $5)
            "#,
        )
        .bind(thread_id)
        .bind(workspace_id)
        .bind(title)
        .bind(thread_type)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        for agent_id in &participants {
            sqlx::query("INSERT INTO thread_participants (thread_id, agent_id) VALUES ($1, $2)")
                .bind(thread_id)
                .bind(agent_id)
                .execute(&mut *tx)
                .await?;
        }

        let query = format!("{THREAD_SELECT} WHERE t.thread_id = $1");
        let record = sqlx::query_as::<_, ThreadRecord>(&query)
            .bind(thread_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn get_thread(&self, thread_id: &ThreadId) -> Result<Option<ThreadRecord>> {
        let query = format!("{THREAD_SELECT} WHERE t.thread_id = $1");
        let record = sqlx::query_as::<_, ThreadRecord>(&query)
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn update_thread_status(
        &self,
        thread_id: &ThreadId,
        next: ThreadStatus,
        updated_at: DateTime<Utc>,
        expected_current: ThreadStatus,
    ) -> Result<Cas<ThreadRecord>> {
        let clear_escalation = expected_current == ThreadStatus::Blocked && next != ThreadStatus::Blocked;
        let updated = sqlx::query(
            r#"
            UPDATE threads
            SET status = $1,
                updated_at = $2,
                escalation_owner_agent_id = CASE WHEN $3 THEN NULL ELSE escalation_owner_agent_id END,
                escalation_assigned_by_agent_id = CASE WHEN $3 THEN NULL ELSE escalation_assigned_by_agent_id END,
                escalation_assigned_at = CASE WHEN $3 THEN NULL ELSE escalation_assigned_at END
            WHERE thread_id = $4 AND status = $5
            "#,
        )
        .bind(next)
        .bind(updated_at)
        .bind(clear_escalation)
        .bind(thread_id)
        .bind(expected_current)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_thread(thread_id).await
    }

    async fn set_escalation_owner(
        &self,
        thread_id: &ThreadId,
        owner_agent_id: &AgentId,
        assigned_by: &AgentId,
        now: DateTime<Utc>,
        require_existing_owner: bool,
    ) -> Result<Cas<ThreadRecord>> {
        let owner_clause = if require_existing_owner {
            "escalation_owner_agent_id IS NOT NULL"
        } else {
            "escalation_owner_agent_id IS NULL"
        };
        let query = format!(
            r#"
            UPDATE threads
            SET escalation_owner_agent_id = $1,
                escalation_assigned_by_agent_id = $2,
                escalation_assigned_at = $3,
                updated_at = $3
            WHERE thread_id = $4 AND status = 'blocked' AND {owner_clause}
            "#
        );
        let updated = sqlx::query(&query)
            .bind(owner_agent_id)
            .bind(assigned_by)
            .bind(now)
            .bind(thread_id)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_thread(thread_id).await
    }

    async fn recent_messages_for_summary(
        &self,
        thread_id: &ThreadId,
        max_messages: usize,
    ) -> Result<Vec<crate::domain::message::Message>> {
        let rows = sqlx::query_as::<_, crate::domain::message::Message>(
            r#"
            SELECT message_id, thread_id, schema_version, seq, sender_agent_id, sender_session_id,
                   kind, body, metadata, in_reply_to, idempotency_key, created_at
            FROM messages
            WHERE thread_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(thread_id)
        .bind(max_messages as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
