use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_domain::{Job, JobRepository, JobStatus};
use scheduler_errors::{SchedulerError, SchedulerResult};
use sqlx::SqliteConnection;
use tracing::debug;

use super::SqliteStore;
use crate::database::mapping::{MappingHelpers, JOB_COLUMNS};

/// 按版本条件更新一个任务，供单条更新与事务提交共用
pub(crate) async fn update_job_on(conn: &mut SqliteConnection, job: &Job) -> SchedulerResult<Job> {
    let payload = MappingHelpers::to_json(&job.payload, "payload")?;

    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET payload = ?, priority = ?, calendar_key = ?, not_before = ?, due_at = ?, due_at_ms = ?,
            status = ?, assigned_worker_id = ?, attempt = ?, max_attempts = ?, last_error = ?,
            cancel_requested = ?, updated_at = ?, started_at = ?, finished_at = ?,
            version = version + 1
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(payload)
    .bind(job.priority)
    .bind(&job.calendar_key)
    .bind(job.not_before)
    .bind(job.due_at)
    .bind(MappingHelpers::due_at_millis(job.due_at))
    .bind(job.status.as_str())
    .bind(job.assigned_worker_id.as_deref())
    .bind(job.attempt as i64)
    .bind(job.max_attempts as i64)
    .bind(job.last_error.as_deref())
    .bind(job.cancel_requested)
    .bind(job.updated_at)
    .bind(job.started_at)
    .bind(job.finished_at)
    .bind(job.id)
    .bind(job.version)
    .execute(&mut *conn)
    .await
    .map_err(SchedulerError::Database)?;

    if result.rows_affected() == 0 {
        let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM jobs WHERE id = ?")
            .bind(job.id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(SchedulerError::Database)?;

        return Err(match exists {
            Some(_) => SchedulerError::version_conflict("job", job.id, job.version),
            None => SchedulerError::job_not_found(job.id),
        });
    }

    debug!("更新任务成功: {} -> {}", job.id, job.status);
    Ok(job.with_version(job.version + 1))
}

#[async_trait]
impl JobRepository for SqliteStore {
    async fn create(&self, job: &Job) -> SchedulerResult<Job> {
        let payload = MappingHelpers::to_json(&job.payload, "payload")?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (tenant_id, queue, job_key, payload, priority, calendar_key, not_before,
                              due_at, due_at_ms, status, assigned_worker_id, attempt, max_attempts,
                              last_error, cancel_requested, version, created_at, updated_at,
                              started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.tenant_id)
        .bind(&job.queue)
        .bind(&job.job_key)
        .bind(payload)
        .bind(job.priority)
        .bind(&job.calendar_key)
        .bind(job.not_before)
        .bind(job.due_at)
        .bind(MappingHelpers::due_at_millis(job.due_at))
        .bind(job.status.as_str())
        .bind(job.assigned_worker_id.as_deref())
        .bind(job.attempt as i64)
        .bind(job.max_attempts as i64)
        .bind(job.last_error.as_deref())
        .bind(job.cancel_requested)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let stored = job.with_id(result.last_insert_rowid()).with_version(1);
        debug!("创建任务成功: {}", stored.id);
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> SchedulerResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_job).transpose()
    }

    async fn find_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status IN (?, ?) AND due_at_ms <= ?
            ORDER BY priority DESC, due_at_ms ASC, id ASC
            LIMIT ?
            "#
        ))
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Retrying.as_str())
        .bind(MappingHelpers::due_at_millis(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        // 毫秒列只用于筛选与粗排，最终顺序以完整时间戳为准
        let mut jobs = rows
            .iter()
            .map(MappingHelpers::row_to_job)
            .collect::<SchedulerResult<Vec<Job>>>()?;
        jobs.retain(|job| job.is_dispatchable(now));
        jobs.sort_by(Job::dispatch_order);
        Ok(jobs)
    }

    async fn find_active_by_worker(&self, worker_id: &str) -> SchedulerResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE assigned_worker_id = ? AND status IN (?, ?) ORDER BY id"
        ))
        .bind(worker_id)
        .bind(JobStatus::Assigned.as_str())
        .bind(JobStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(MappingHelpers::row_to_job).collect()
    }

    async fn find_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> SchedulerResult<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY id LIMIT ?"
                ))
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id LIMIT ?"))
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(SchedulerError::Database)?;

        rows.iter().map(MappingHelpers::row_to_job).collect()
    }

    async fn update(&self, job: &Job) -> SchedulerResult<Job> {
        let mut conn = self.pool.acquire().await.map_err(SchedulerError::Database)?;
        update_job_on(&mut conn, job).await
    }
}
