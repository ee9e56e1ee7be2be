//! SQLite persistence for executions, logs, schedules and trigger firings
//!
//! Every status change is a conditional `UPDATE`, so two workers or two
//! scheduler ticks racing on the same row cannot both win.

use crate::storage::models::{
    from_millis, to_millis, ExecutionStatus, LogStatus, NewExecution, NewLog, WorkflowExecution,
    WorkflowLog, WorkflowSchedule,
};
use crate::workflow::types::ExecutionContext;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    Row, Sqlite,
};
use uuid::Uuid;

const EXECUTION_COLUMNS: &str = "id, workflow_id, tenant_id, status, current_node_id, context, \
     resume_at, last_error, lease_id, created_at, updated_at";

/// Execution store over the engine database
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    pool: SqlitePool,
}

impl ExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new `pending` execution
    pub async fn create_execution(
        &self,
        new: NewExecution,
        now: DateTime<Utc>,
    ) -> Result<WorkflowExecution> {
        let execution = build_execution(new, now);
        insert_execution(&self.pool, &execution).await?;

        tracing::info!(
            "📥 Queued execution {} for workflow {}",
            execution.id,
            execution.workflow_id
        );
        Ok(execution)
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(execution_from_row).transpose()
    }

    pub async fn get_status(&self, id: &str) -> Result<Option<ExecutionStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM workflow_executions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        status.map(|s| s.parse()).transpose()
    }

    /// Most recent executions first, optionally filtered by status
    pub async fn list_executions(
        &self,
        status: Option<ExecutionStatus>,
        limit: i64,
    ) -> Result<Vec<WorkflowExecution>> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE status = ? \
                     ORDER BY created_at DESC LIMIT ?"
                );
                sqlx::query(&sql)
                    .bind(status.as_str())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {EXECUTION_COLUMNS} FROM workflow_executions \
                     ORDER BY created_at DESC LIMIT ?"
                );
                sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(execution_from_row).collect()
    }

    /// Atomically move the oldest due `pending` execution to `running`
    ///
    /// The claim writes a fresh lease id; the caller must pass the returned
    /// execution back to [`ExecutionStore::save`] for its writes to land.
    pub async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<WorkflowExecution>> {
        let lease = Uuid::new_v4().to_string();
        let sql = format!(
            r#"
            UPDATE workflow_executions
            SET status = 'running', lease_id = ?1, resume_at = NULL, updated_at = ?2
            WHERE id = (
                SELECT id FROM workflow_executions
                WHERE status = 'pending' AND (resume_at IS NULL OR resume_at <= ?2)
                ORDER BY created_at, id
                LIMIT 1
            ) AND status = 'pending'
            RETURNING {EXECUTION_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&lease)
            .bind(to_millis(now))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(execution_from_row).transpose()
    }

    /// Persist an execution the caller holds the lease for
    ///
    /// Returns `false` when the row is no longer `running` under this lease
    /// (cancelled, or reclaimed after going stale); nothing is written then.
    pub async fn save(&self, execution: &WorkflowExecution, now: DateTime<Utc>) -> Result<bool> {
        let context = serde_json::to_string(&execution.context)?;
        let next_lease = match execution.status {
            ExecutionStatus::Running => execution.lease_id.as_deref(),
            _ => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = ?, current_node_id = ?, context = ?, resume_at = ?,
                last_error = ?, lease_id = ?, updated_at = ?
            WHERE id = ? AND status = 'running' AND lease_id IS ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(&execution.current_node_id)
        .bind(&context)
        .bind(execution.resume_at.map(to_millis))
        .bind(&execution.last_error)
        .bind(next_lease)
        .bind(to_millis(now))
        .bind(&execution.id)
        .bind(&execution.lease_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark a non-terminal execution as failed
    pub async fn cancel(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = 'failed', last_error = ?, resume_at = NULL, lease_id = NULL, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'running', 'waiting')
            "#,
        )
        .bind(reason)
        .bind(to_millis(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Re-admit every waiting execution whose wake-up time has passed
    pub async fn resume_due(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE workflow_executions
            SET status = 'pending', resume_at = NULL, updated_at = ?1
            WHERE status = 'waiting' AND resume_at <= ?1
            RETURNING id
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Return `running` executions untouched since `stale_before` to `pending`
    pub async fn requeue_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE workflow_executions
            SET status = 'pending', lease_id = NULL, updated_at = ?
            WHERE status = 'running' AND updated_at < ?
            RETURNING id
            "#,
        )
        .bind(to_millis(now))
        .bind(to_millis(stale_before))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn append_log(&self, log: NewLog) -> Result<i64> {
        let output = log.output.as_ref().map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_logs (execution_id, node_id, attempt_number, status, output, error, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.execution_id)
        .bind(&log.node_id)
        .bind(log.attempt_number as i64)
        .bind(log.status.as_str())
        .bind(output)
        .bind(&log.error)
        .bind(to_millis(log.timestamp))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Logs of an execution in insertion order
    pub async fn list_logs(&self, execution_id: &str) -> Result<Vec<WorkflowLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, execution_id, node_id, attempt_number, status, output, error, timestamp
            FROM workflow_logs WHERE execution_id = ? ORDER BY id
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let output: Option<String> = row.try_get("output")?;
                let status: String = row.try_get("status")?;
                let attempt: i64 = row.try_get("attempt_number")?;
                Ok(WorkflowLog {
                    id: row.try_get("id")?,
                    execution_id: row.try_get("execution_id")?,
                    node_id: row.try_get("node_id")?,
                    attempt_number: attempt as u32,
                    status: status.parse::<LogStatus>()?,
                    output: output.map(|raw| serde_json::from_str(&raw)).transpose()?,
                    error: row.try_get("error")?,
                    timestamp: from_millis(row.try_get("timestamp")?)?,
                })
            })
            .collect()
    }

    /// Create or replace the schedule of a workflow
    pub async fn upsert_schedule(
        &self,
        workflow_id: &str,
        cron_expression: &str,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_schedules (workflow_id, cron_expression, enabled, next_run)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(workflow_id) DO UPDATE SET
                cron_expression = excluded.cron_expression,
                enabled = 1,
                next_run = CASE
                    WHEN workflow_schedules.cron_expression = excluded.cron_expression
                        AND workflow_schedules.next_run IS NOT NULL
                    THEN workflow_schedules.next_run
                    ELSE excluded.next_run
                END
            "#,
        )
        .bind(workflow_id)
        .bind(cron_expression)
        .bind(next_run.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_schedule(&self, workflow_id: &str) -> Result<Option<WorkflowSchedule>> {
        let row = sqlx::query(
            "SELECT workflow_id, cron_expression, enabled, last_run, next_run \
             FROM workflow_schedules WHERE workflow_id = ?",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    pub async fn delete_schedule(&self, workflow_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflow_schedules WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Enabled schedules whose next run is due (or was never computed)
    pub async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowSchedule>> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_id, cron_expression, enabled, last_run, next_run
            FROM workflow_schedules
            WHERE enabled = 1 AND (next_run IS NULL OR next_run <= ?)
            ORDER BY next_run
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    /// Advance a due schedule and queue its execution in one transaction
    ///
    /// The update only matches while `next_run` still holds the value the
    /// caller observed, so a schedule fires at most once per `next_run`.
    pub async fn fire_schedule(
        &self,
        schedule: &WorkflowSchedule,
        next_run: DateTime<Utc>,
        new: NewExecution,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowExecution>> {
        let mut tx = self.pool.begin().await?;

        let advanced = sqlx::query(
            r#"
            UPDATE workflow_schedules
            SET last_run = ?, next_run = ?
            WHERE workflow_id = ? AND enabled = 1 AND next_run IS ?
            "#,
        )
        .bind(to_millis(now))
        .bind(to_millis(next_run))
        .bind(&schedule.workflow_id)
        .bind(schedule.next_run.map(to_millis))
        .execute(&mut *tx)
        .await?;

        if advanced.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let execution = build_execution(new, now);
        insert_execution(&mut *tx, &execution).await?;
        tx.commit().await?;

        Ok(Some(execution))
    }

    /// Queue an execution unless one was already queued for `dedupe_key`
    pub async fn create_execution_once(
        &self,
        dedupe_key: &str,
        new: NewExecution,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowExecution>> {
        let mut tx = self.pool.begin().await?;
        let execution = build_execution(new, now);

        let recorded = sqlx::query(
            r#"
            INSERT OR IGNORE INTO trigger_firings (workflow_id, dedupe_key, execution_id, fired_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&execution.workflow_id)
        .bind(dedupe_key)
        .bind(&execution.id)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        if recorded.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        insert_execution(&mut *tx, &execution).await?;
        tx.commit().await?;

        Ok(Some(execution))
    }
}

fn build_execution(new: NewExecution, now: DateTime<Utc>) -> WorkflowExecution {
    let context = ExecutionContext::from_trigger(
        &new.workflow_id,
        &new.tenant_id,
        new.trigger_data,
        new.variables,
        now,
    );

    WorkflowExecution {
        id: Uuid::new_v4().to_string(),
        workflow_id: new.workflow_id,
        tenant_id: new.tenant_id,
        status: ExecutionStatus::Pending,
        current_node_id: None,
        context,
        resume_at: None,
        last_error: None,
        lease_id: None,
        created_at: now,
        updated_at: now,
    }
}

async fn insert_execution<'e, E>(executor: E, execution: &WorkflowExecution) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let context = serde_json::to_string(&execution.context)?;
    sqlx::query(
        r#"
        INSERT INTO workflow_executions
            (id, workflow_id, tenant_id, status, current_node_id, context, resume_at,
             last_error, lease_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&execution.id)
    .bind(&execution.workflow_id)
    .bind(&execution.tenant_id)
    .bind(execution.status.as_str())
    .bind(&execution.current_node_id)
    .bind(context)
    .bind(execution.resume_at.map(to_millis))
    .bind(&execution.last_error)
    .bind(&execution.lease_id)
    .bind(to_millis(execution.created_at))
    .bind(to_millis(execution.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution> {
    let status: String = row.try_get("status")?;
    let context: String = row.try_get("context")?;
    let resume_at: Option<i64> = row.try_get("resume_at")?;

    Ok(WorkflowExecution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        tenant_id: row.try_get("tenant_id")?,
        status: status.parse()?,
        current_node_id: row.try_get("current_node_id")?,
        context: serde_json::from_str(&context)?,
        resume_at: resume_at.map(from_millis).transpose()?,
        last_error: row.try_get("last_error")?,
        lease_id: row.try_get("lease_id")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<WorkflowSchedule> {
    let enabled: i64 = row.try_get("enabled")?;
    let last_run: Option<i64> = row.try_get("last_run")?;
    let next_run: Option<i64> = row.try_get("next_run")?;

    Ok(WorkflowSchedule {
        workflow_id: row.try_get("workflow_id")?,
        cron_expression: row.try_get("cron_expression")?,
        enabled: enabled != 0,
        last_run: last_run.map(from_millis).transpose()?,
        next_run: next_run.map(from_millis).transpose()?,
    })
}
