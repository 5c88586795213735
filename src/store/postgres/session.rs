use super::PostgresStore;
use crate::domain::session::SessionRecord;
use crate::ids::{AgentId, WorkspaceId};
use crate::store::SessionStore;
use anyhow::Result;
use chrono::{DateTime, Utc};

const SESSION_COLUMNS: &str = "agent_id, workspace_id, session_id, runtime, management_mode, \
     resumable, status, last_heartbeat_at, updated_at";

#[async_trait::async_trait]
impl SessionStore for PostgresStore {
    async fn heartbeat_upsert(&self, record: SessionRecord) -> Result<SessionRecord> {
        let query = format!(
            r#"
            INSERT INTO session_registry (agent_id, workspace_id, session_id, runtime, management_mode,
                resumable, status, last_heartbeat_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT (agent_id, workspace_id) DO UPDATE SET
                session_id = EXCLUDED.session_id,
                runtime = EXCLUDED.runtime,
                management_mode = EXCLUDED.management_mode,
                resumable = EXCLUDED.resumable,
                status = EXCLUDED.status,
                last_heartbeat_at = EXCLUDED.last_heartbeat_at,
                updated_at = EXCLUDED.updated_at
            WHERE session_registry.last_heartbeat_at <= EXCLUDED.last_heartbeat_at
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let upserted = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(&record.agent_id)
            .bind(&record.workspace_id)
            .bind(&record.session_id)
            .bind(&record.runtime)
            .bind(record.management_mode)
            .bind(record.resumable)
            .bind(record.status)
            .bind(record.last_heartbeat_at)
            .fetch_optional(&self.pool)
            .await?;

        match upserted {
            Some(r) => Ok(r),
            // Lost the last-writer-wins race: the stale incoming heartbeat
            // was dropped, return what's actually stored.
            None => self
                .get_session(&record.agent_id, &record.workspace_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("session vanished during heartbeat upsert")),
        }
    }

    async fn get_session(&self, agent_id: &AgentId, workspace_id: &WorkspaceId) -> Result<Option<SessionRecord>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM session_registry WHERE agent_id = $1 AND workspace_id = $2");
        let record = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(agent_id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_sessions(&self, workspace_id: &WorkspaceId) -> Result<Vec<SessionRecord>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM session_registry WHERE workspace_id = $1");
        let rows = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn mark_offline_if_stale(
        &self,
        agent_id: &AgentId,
        workspace_id: &WorkspaceId,
        now: DateTime<Utc>,
        stale_after_hours: i64,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE session_registry
            SET status = 'offline', updated_at = $1
            WHERE agent_id = $2 AND workspace_id = $3
              AND status <> 'offline'
              AND last_heartbeat_at <= $1 - ($4 || ' hours')::INTERVAL
            "#,
        )
        .bind(now)
        .bind(agent_id)
        .bind(workspace_id)
        .bind(stale_after_hours)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }
}
