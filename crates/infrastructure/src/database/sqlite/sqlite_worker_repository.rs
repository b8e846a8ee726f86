use async_trait::async_trait;
use scheduler_domain::{Worker, WorkerRepository};
use scheduler_errors::{SchedulerError, SchedulerResult};
use sqlx::SqliteConnection;
use tracing::debug;

use super::SqliteStore;
use crate::database::mapping::{is_unique_violation, MappingHelpers, WORKER_COLUMNS};

/// 按版本条件更新一个Worker，供单条更新与事务提交共用
pub(crate) async fn update_worker_on(
    conn: &mut SqliteConnection,
    worker: &Worker,
) -> SchedulerResult<Worker> {
    let capabilities = MappingHelpers::to_json(worker.capabilities(), "capabilities")?;

    let result = sqlx::query(
        r#"
        UPDATE workers
        SET tenant_id = ?, name = ?, capabilities = ?, heartbeat_at = ?, status = ?,
            max_parallel = ?, current_jobs = ?, version = version + 1
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(worker.tenant_id())
    .bind(worker.name())
    .bind(capabilities)
    .bind(worker.heartbeat_at())
    .bind(worker.status().as_str())
    .bind(worker.max_parallel() as i64)
    .bind(worker.current_jobs() as i64)
    .bind(worker.id())
    .bind(worker.version())
    .execute(&mut *conn)
    .await
    .map_err(SchedulerError::Database)?;

    if result.rows_affected() == 0 {
        let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM workers WHERE id = ?")
            .bind(worker.id())
            .fetch_optional(&mut *conn)
            .await
            .map_err(SchedulerError::Database)?;

        return Err(match exists {
            Some(_) => SchedulerError::version_conflict("worker", worker.id(), worker.version()),
            None => SchedulerError::worker_not_found(worker.id()),
        });
    }

    debug!("更新Worker成功: {} (版本 {})", worker.id(), worker.version() + 1);
    Ok(worker.with_version(worker.version() + 1))
}

#[async_trait]
impl WorkerRepository for SqliteStore {
    async fn register(&self, worker: &Worker) -> SchedulerResult<Worker> {
        let capabilities = MappingHelpers::to_json(worker.capabilities(), "capabilities")?;
        let stored = worker.with_version(1);

        sqlx::query(
            r#"
            INSERT INTO workers (id, tenant_id, name, capabilities, heartbeat_at, status,
                                 max_parallel, current_jobs, version, registered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stored.id())
        .bind(stored.tenant_id())
        .bind(stored.name())
        .bind(capabilities)
        .bind(stored.heartbeat_at())
        .bind(stored.status().as_str())
        .bind(stored.max_parallel() as i64)
        .bind(stored.current_jobs() as i64)
        .bind(stored.version())
        .bind(stored.registered_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SchedulerError::version_conflict("worker", stored.id(), 0)
            } else {
                SchedulerError::Database(e)
            }
        })?;

        debug!("注册Worker成功: {}", stored.id());
        Ok(stored)
    }

    async fn find_by_id(&self, id: &str) -> SchedulerResult<Option<Worker>> {
        let row = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_worker).transpose()
    }

    async fn find_all(&self) -> SchedulerResult<Vec<Worker>> {
        let rows = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM workers ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        rows.iter().map(MappingHelpers::row_to_worker).collect()
    }

    async fn update(&self, worker: &Worker) -> SchedulerResult<Worker> {
        let mut conn = self.pool.acquire().await.map_err(SchedulerError::Database)?;
        update_worker_on(&mut conn, worker).await
    }

    async fn unregister(&self, id: &str, expected_version: i64) -> SchedulerResult<bool> {
        let result = sqlx::query("DELETE FROM workers WHERE id = ? AND version = ?")
            .bind(id)
            .bind(expected_version)
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if result.rows_affected() > 0 {
            debug!("注销Worker成功: {}", id);
            return Ok(true);
        }

        // 区分记录不存在与版本不符
        if WorkerRepository::find_by_id(self, id).await?.is_some() {
            return Err(SchedulerError::version_conflict("worker", id, expected_version));
        }
        Ok(false)
    }
}
