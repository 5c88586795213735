use super::PostgresStore;
use crate::domain::trigger::{FallbackRun, FallbackRunStatus, TriggerAttempt, TriggerJob, TriggerStatus};
use crate::ids::{AgentId, ThreadId, TriggerId, WorkspaceId};
use crate::store::{Cas, TriggerStore};
use anyhow::Result;
use chrono::{DateTime, Utc};

const JOB_COLUMNS: &str = "trigger_id, thread_id, workspace_id, target_agent_id, target_session_id, \
     reason, prompt, status, attempts, max_retries, next_retry_at, created_at, updated_at";

const ATTEMPT_COLUMNS: &str = "trigger_id, attempt_no, attempt_result, error_code, details, created_at";

const RUN_COLUMNS: &str = "trigger_id, pid, launch_mode, status, started_at, deadline_at, ended_at, error_code";

#[async_trait::async_trait]
impl TriggerStore for PostgresStore {
    async fn insert_or_get(&self, job: TriggerJob) -> Result<(TriggerJob, bool)> {
        let query = format!(
            r#"
            INSERT INTO trigger_jobs ({JOB_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            ON CONFLICT (trigger_id) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, TriggerJob>(&query)
            .bind(&job.trigger_id)
            .bind(&job.thread_id)
            .bind(&job.workspace_id)
            .bind(&job.target_agent_id)
            .bind(&job.target_session_id)
            .bind(&job.reason)
            .bind(&job.prompt)
            .bind(job.status)
            .bind(job.attempts)
            .bind(job.max_retries)
            .bind(job.next_retry_at)
            .bind(job.created_at)
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(row) => Ok((row, true)),
            None => {
                let existing = self
                    .get(&job.trigger_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("trigger job conflicted on insert but is missing on reread"))?;
                Ok((existing, false))
            }
        }
    }

    async fn get(&self, trigger_id: &TriggerId) -> Result<Option<TriggerJob>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM trigger_jobs WHERE trigger_id = $1");
        let row = sqlx::query_as::<_, TriggerJob>(&query)
            .bind(trigger_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn count_pending_for_workspace(&self, workspace_id: &WorkspaceId) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM trigger_jobs
            WHERE workspace_id = $1
              AND status IN ('queued', 'triggering', 'deferred', 'timeout',
                              'fallback_resume', 'fallback_spawn', 'fallback_running',
                              'callback_pending', 'callback_retry')
            "#,
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_non_terminal_for_reason(
        &self,
        workspace_id: &WorkspaceId,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        reason: &str,
    ) -> Result<Option<TriggerJob>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM trigger_jobs
            WHERE workspace_id = $1 AND thread_id = $2 AND target_agent_id = $3 AND reason = $4
              AND status NOT IN ('callback_delivered', 'callback_failed')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, TriggerJob>(&query)
            .bind(workspace_id)
            .bind(thread_id)
            .bind(agent_id)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn recent_auto_triggers(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        limit: i64,
    ) -> Result<Vec<TriggerJob>> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM trigger_jobs
            WHERE thread_id = $1 AND target_agent_id = $2 AND reason = $3
            ORDER BY created_at DESC
            LIMIT $4
            "#
        );
        let rows = sqlx::query_as::<_, TriggerJob>(&query)
            .bind(thread_id)
            .bind(agent_id)
            .bind(crate::store::AUTO_UNREAD_REASON)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn reclaim_stale_leases(
        &self,
        workspace_id: &WorkspaceId,
        lease_timeout_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<(TriggerId, bool)>> {
        #[derive(sqlx::FromRow)]
        struct Reclaimed {
            trigger_id: TriggerId,
            has_delivered_attempt: bool,
        }

        let rows = sqlx::query_as::<_, Reclaimed>(
            r#"
            WITH stale AS (
                SELECT trigger_id
                FROM trigger_jobs
                WHERE workspace_id = $1
                  AND status = 'triggering'
                  AND updated_at <= $2 - ($3 || ' milliseconds')::INTERVAL
                FOR UPDATE SKIP LOCKED
            ),
            delivered AS (
                SELECT DISTINCT ta.trigger_id
                FROM trigger_attempts ta
                JOIN stale s ON s.trigger_id = ta.trigger_id
                WHERE ta.attempt_result = 'delivered'
            )
            UPDATE trigger_jobs
            SET status = CASE WHEN d.trigger_id IS NOT NULL THEN 'callback_pending' ELSE 'queued' END,
                updated_at = $2
            FROM stale s
            LEFT JOIN delivered d ON d.trigger_id = s.trigger_id
            WHERE trigger_jobs.trigger_id = s.trigger_id
            RETURNING trigger_jobs.trigger_id, (d.trigger_id IS NOT NULL) AS has_delivered_attempt
            "#,
        )
        .bind(workspace_id)
        .bind(now)
        .bind(lease_timeout_ms)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| (r.trigger_id, r.has_delivered_attempt)).collect())
    }

    async fn claim_due_jobs(
        &self,
        workspace_id: &WorkspaceId,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TriggerJob>> {
        let query = format!(
            r#"
            WITH next_jobs AS (
                SELECT trigger_id
                FROM trigger_jobs
                WHERE workspace_id = $1
                  AND status IN ('queued', 'timeout', 'deferred', 'fallback_resume',
                                  'fallback_spawn', 'callback_pending', 'callback_retry')
                  AND (next_retry_at IS NULL OR next_retry_at <= $2)
                ORDER BY created_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE trigger_jobs
            SET status = 'triggering', updated_at = $2
            WHERE trigger_id IN (SELECT trigger_id FROM next_jobs)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let rows = sqlx::query_as::<_, TriggerJob>(&query)
            .bind(workspace_id)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn transition(
        &self,
        trigger_id: &TriggerId,
        expected: TriggerStatus,
        next: TriggerStatus,
        attempts: i32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Cas<TriggerJob>> {
        let query = format!(
            r#"
            UPDATE trigger_jobs
            SET status = $1, attempts = $2, next_retry_at = $3, updated_at = $4
            WHERE trigger_id = $5 AND status = $6
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TriggerJob>(&query)
            .bind(next)
            .bind(attempts)
            .bind(next_retry_at)
            .bind(now)
            .bind(trigger_id)
            .bind(expected)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn record_attempt(&self, attempt: TriggerAttempt) -> Result<()> {
        let query = format!(
            r#"
            INSERT INTO trigger_attempts ({ATTEMPT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6)
            "#
        );
        sqlx::query(&query)
            .bind(&attempt.trigger_id)
            .bind(attempt.attempt_no)
            .bind(attempt.attempt_result)
            .bind(&attempt.error_code)
            .bind(&attempt.details)
            .bind(attempt.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_attempts(&self, trigger_id: &TriggerId) -> Result<Vec<TriggerAttempt>> {
        let query = format!("SELECT {ATTEMPT_COLUMNS} FROM trigger_attempts WHERE trigger_id = $1 ORDER BY attempt_no ASC");
        let rows = sqlx::query_as::<_, TriggerAttempt>(&query)
            .bind(trigger_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn recent_attempts_for_thread_agent(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        limit: i64,
    ) -> Result<Vec<TriggerAttempt>> {
        let query = format!(
            r#"
            SELECT ta.trigger_id, ta.attempt_no, ta.attempt_result, ta.error_code, ta.details, ta.created_at
            FROM trigger_attempts ta
            JOIN trigger_jobs tj ON tj.trigger_id = ta.trigger_id
            WHERE tj.thread_id = $1 AND tj.target_agent_id = $2
            ORDER BY ta.created_at DESC
            LIMIT $3
            "#
        );
        let rows = sqlx::query_as::<_, TriggerAttempt>(&query)
            .bind(thread_id)
            .bind(agent_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn upsert_fallback_run(&self, run: FallbackRun) -> Result<FallbackRun> {
        let query = format!(
            r#"
            INSERT INTO trigger_fallback_runs ({RUN_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (trigger_id) DO UPDATE SET
                pid = EXCLUDED.pid,
                launch_mode = EXCLUDED.launch_mode,
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                deadline_at = EXCLUDED.deadline_at,
                ended_at = EXCLUDED.ended_at,
                error_code = EXCLUDED.error_code
            RETURNING {RUN_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FallbackRun>(&query)
            .bind(&run.trigger_id)
            .bind(run.pid)
            .bind(run.launch_mode)
            .bind(run.status)
            .bind(run.started_at)
            .bind(run.deadline_at)
            .bind(run.ended_at)
            .bind(&run.error_code)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_fallback_run(&self, trigger_id: &TriggerId) -> Result<Option<FallbackRun>> {
        let query = format!("SELECT {RUN_COLUMNS} FROM trigger_fallback_runs WHERE trigger_id = $1");
        let row = sqlx::query_as::<_, FallbackRun>(&query)
            .bind(trigger_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_running_fallback_runs(&self, workspace_id: &WorkspaceId) -> Result<Vec<FallbackRun>> {
        let query = format!(
            r#"
            SELECT r.trigger_id, r.pid, r.launch_mode, r.status, r.started_at, r.deadline_at, r.ended_at, r.error_code
            FROM trigger_fallback_runs r
            JOIN trigger_jobs tj ON tj.trigger_id = r.trigger_id
            WHERE tj.workspace_id = $1 AND r.status = 'running'
            "#
        );
        let rows = sqlx::query_as::<_, FallbackRun>(&query)
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn update_fallback_run_status(
        &self,
        trigger_id: &TriggerId,
        status: FallbackRunStatus,
        ended_at: Option<DateTime<Utc>>,
        error_code: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trigger_fallback_runs
            SET status = $1, ended_at = $2, error_code = $3
            WHERE trigger_id = $4
            "#,
        )
        .bind(status)
        .bind(ended_at)
        .bind(error_code)
        .bind(trigger_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_recent_resume_failures(
        &self,
        workspace_id: &WorkspaceId,
        agent_id: &AgentId,
        window_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM trigger_attempts ta
            JOIN trigger_jobs tj ON tj.trigger_id = ta.trigger_id
            WHERE tj.workspace_id = $1 AND tj.target_agent_id = $2
              AND ta.attempt_result = 'fallback_resume_failed'
              AND ta.created_at >= $3 - ($4 || ' milliseconds')::INTERVAL
            "#,
        )
        .bind(workspace_id)
        .bind(agent_id)
        .bind(now)
        .bind(window_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_jobs_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<TriggerJob>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM trigger_jobs WHERE thread_id = $1 ORDER BY created_at DESC");
        let rows = sqlx::query_as::<_, TriggerJob>(&query)
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
