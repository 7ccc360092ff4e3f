use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use super::{JOB_COLUMNS, PgStore, row_to_job};
use crate::jobs::{
    BackgroundJob, JobFilter, JobId, JobStats, JobStatus, JobUpdate, NewJob, RunningJobProgress,
};
use crate::store::StoreError;
use crate::store::traits::JobStore;

impl PgStore {
    /// Distinguishes a missing row from a status mismatch after a CAS missed.
    async fn transition_miss(&self, id: JobId, from: JobStatus) -> StoreError {
        let current = sqlx::query("SELECT status FROM background_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        match current {
            Ok(Some(row)) => match row.try_get::<String, _>("status") {
                Ok(status) => {
                    StoreError::Conflict(format!("job {id} is {status} (expected {from})"))
                }
                Err(error) => error.into(),
            },
            Ok(None) => StoreError::NotFound { entity: "job", id },
            Err(error) => error.into(),
        }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn enqueue(&self, job: NewJob) -> Result<BackgroundJob, StoreError> {
        let params = serde_json::to_value(&job.params)?;
        let sql = format!(
            r"
            INSERT INTO background_jobs
                (id, type, status, params, retry_count, max_retries, created_by, source_job_id)
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7)
            RETURNING {JOB_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::now_v7())
            .bind(job.job_type.as_str())
            .bind(params)
            .bind(job.retry_count)
            .bind(job.max_retries)
            .bind(job.created_by)
            .bind(job.source_job_id)
            .fetch_one(&self.pool)
            .await?;
        row_to_job(&row)
    }

    async fn get(&self, id: JobId) -> Result<BackgroundJob, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM background_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "job", id })?;
        row_to_job(&row)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<BackgroundJob>, StoreError> {
        let statuses: Option<Vec<String>> = (!filter.statuses.is_empty()).then(|| {
            filter
                .statuses
                .iter()
                .map(|status| status.as_str().to_string())
                .collect()
        });
        let sql = format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM background_jobs
            WHERE ($1::text[] IS NULL OR status = ANY($1))
              AND ($2::uuid IS NULL OR (params ->> 'weight_config_id')::uuid = $2)
            ORDER BY created_at DESC, seq DESC
            LIMIT $3
            "
        );
        let rows = sqlx::query(&sql)
            .bind(statuses)
            .bind(filter.weight_config_id)
            .bind(filter.effective_limit())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        update: JobUpdate,
    ) -> Result<BackgroundJob, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }
        let sql = format!(
            r"
            UPDATE background_jobs
            SET status = $3,
                started_at = CASE WHEN $3 = 'running' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                completed_at = CASE WHEN $3 IN ('completed', 'error') THEN NOW() ELSE completed_at END,
                cancelled_at = CASE WHEN $3 = 'cancelled' THEN NOW() ELSE cancelled_at END,
                progress = COALESCE($4, progress),
                total = COALESCE($5, total),
                error_message = COALESCE($6, error_message)
            WHERE id = $1 AND status = $2
            RETURNING {JOB_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(update.progress)
            .bind(update.total)
            .bind(update.error_message)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row_to_job(&row),
            None => Err(self.transition_miss(id, from).await),
        }
    }

    async fn record_progress(
        &self,
        id: JobId,
        progress: i64,
        total: Option<i64>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE background_jobs
            SET progress = $2,
                total = COALESCE($3, total)
            WHERE id = $1 AND status = 'running'
            ",
        )
        .bind(id)
        .bind(progress)
        .bind(total)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM background_jobs WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(false)
        } else {
            Err(StoreError::NotFound { entity: "job", id })
        }
    }

    async fn claim_next_pending(&self) -> Result<Option<BackgroundJob>, StoreError> {
        let sql = format!(
            r"
            UPDATE background_jobs
            SET status = 'running',
                started_at = COALESCE(started_at, NOW())
            WHERE id = (
                SELECT id
                FROM background_jobs
                WHERE status = 'pending'
                  AND NOT EXISTS (SELECT 1 FROM background_jobs WHERE status = 'running')
                ORDER BY created_at ASC, seq ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "
        );
        let row = match sqlx::query(&sql).fetch_optional(&self.pool).await {
            Ok(row) => row,
            // Another claimer won the single running slot.
            Err(error) => match StoreError::from(error) {
                StoreError::Conflict(_) => return Ok(None),
                other => return Err(other),
            },
        };
        row.as_ref().map(row_to_job).transpose()
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT status, COUNT(*) AS count
            FROM background_jobs
            GROUP BY status
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let status = JobStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown job status: {status}")))?;
            stats.record(status, count);
        }

        let running = sqlx::query(
            "SELECT id, progress, total FROM background_jobs WHERE status = 'running' LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = running {
            stats.running_job = Some(RunningJobProgress {
                id: row.try_get("id")?,
                progress: row.try_get("progress")?,
                total: row.try_get("total")?,
            });
        }
        Ok(stats)
    }

    async fn queue_position(&self, id: JobId) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT j.status,
                   (
                       SELECT COUNT(*)
                       FROM background_jobs o
                       WHERE o.status = 'running'
                          OR (o.status = 'pending' AND (o.created_at, o.seq) < (j.created_at, j.seq))
                   ) AS ahead
            FROM background_jobs j
            WHERE j.id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { entity: "job", id })?;

        let status: String = row.try_get("status")?;
        if status != JobStatus::Pending.as_str() {
            return Ok(None);
        }
        Ok(Some(row.try_get("ahead")?))
    }
}
