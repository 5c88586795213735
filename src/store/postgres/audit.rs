use super::PostgresStore;
use crate::domain::audit::AuditEvent;
use crate::ids::ThreadId;
use crate::store::AuditStore;
use anyhow::Result;

const AUDIT_COLUMNS: &str = "workspace_id, actor_agent_id, actor_role, operation, resource_type, \
     resource_id, thread_id, request_id, result, payload, created_at";

#[async_trait::async_trait]
impl AuditStore for PostgresStore {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let query = format!(
            r#"
            INSERT INTO audit_events ({AUDIT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#
        );
        sqlx::query(&query)
            .bind(&event.workspace_id)
            .bind(&event.actor_agent_id)
            .bind(&event.actor_role)
            .bind(&event.operation)
            .bind(&event.resource_type)
            .bind(&event.resource_id)
            .bind(&event.thread_id)
            .bind(&event.request_id)
            .bind(event.result)
            .bind(&event.payload)
            .bind(event.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_for_thread(&self, thread_id: &ThreadId, limit: i64) -> Result<Vec<AuditEvent>> {
        let query = format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_events WHERE thread_id = $1 ORDER BY created_at DESC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, AuditEvent>(&query)
            .bind(thread_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
