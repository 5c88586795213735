use super::PostgresStore;
use crate::domain::cursor::ParticipantCursor;
use crate::ids::{AgentId, ThreadId, WorkspaceId};
use crate::store::{Cas, CursorStore};
use anyhow::Result;
use chrono::{DateTime, Utc};

const CURSOR_COLUMNS: &str = "thread_id, agent_id, last_read_seq, last_acked_message_id, updated_at";

#[async_trait::async_trait]
impl CursorStore for PostgresStore {
    async fn get_cursor(&self, thread_id: &ThreadId, agent_id: &AgentId) -> Result<Option<ParticipantCursor>> {
        let query = format!("SELECT {CURSOR_COLUMNS} FROM participant_cursors WHERE thread_id = $1 AND agent_id = $2");
        let cursor = sqlx::query_as::<_, ParticipantCursor>(&query)
            .bind(thread_id)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(cursor)
    }

    async fn ack_read(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        last_read_seq: i64,
        now: DateTime<Utc>,
    ) -> Result<Cas<ParticipantCursor>> {
        let query = format!(
            r#"
            INSERT INTO participant_cursors (thread_id, agent_id, last_read_seq, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (thread_id, agent_id) DO UPDATE SET
                last_read_seq = EXCLUDED.last_read_seq,
                updated_at = EXCLUDED.updated_at
            WHERE participant_cursors.last_read_seq <= EXCLUDED.last_read_seq
            RETURNING {CURSOR_COLUMNS}
            "#
        );
        let cursor = sqlx::query_as::<_, ParticipantCursor>(&query)
            .bind(thread_id)
            .bind(agent_id)
            .bind(last_read_seq)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(cursor)
    }

    async fn active_thread_cursors(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<(ThreadId, ParticipantCursor, i64, Option<AgentId>)>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            thread_id: ThreadId,
            agent_id: AgentId,
            last_read_seq: i64,
            last_acked_message_id: Option<crate::ids::MessageId>,
            updated_at: DateTime<Utc>,
            latest_seq: i64,
            escalation_owner_agent_id: Option<AgentId>,
        }

        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT
                tp.thread_id,
                tp.agent_id,
                COALESCE(pc.last_read_seq, 0) AS last_read_seq,
                pc.last_acked_message_id,
                COALESCE(pc.updated_at, t.created_at) AS updated_at,
                COALESCE((SELECT MAX(m.seq) FROM messages m WHERE m.thread_id = t.thread_id), 0) AS latest_seq,
                t.escalation_owner_agent_id
            FROM thread_participants tp
            JOIN threads t ON t.thread_id = tp.thread_id
            LEFT JOIN participant_cursors pc ON pc.thread_id = tp.thread_id AND pc.agent_id = tp.agent_id
            WHERE t.workspace_id = $1 AND t.status = 'active'
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.thread_id.clone(),
                    ParticipantCursor {
                        thread_id: r.thread_id,
                        agent_id: r.agent_id,
                        last_read_seq: r.last_read_seq,
                        last_acked_message_id: r.last_acked_message_id,
                        updated_at: r.updated_at,
                    },
                    r.latest_seq,
                    r.escalation_owner_agent_id,
                )
            })
            .collect())
    }
}
