use async_trait::async_trait;
use scheduler_domain::{ChangeSet, CommittedChanges, UnitOfWork};
use scheduler_errors::{SchedulerError, SchedulerResult};
use tracing::debug;

use super::sqlite_job_repository::update_job_on;
use super::sqlite_worker_repository::update_worker_on;
use super::SqliteStore;

#[async_trait]
impl UnitOfWork for SqliteStore {
    async fn commit(&self, changes: ChangeSet) -> SchedulerResult<CommittedChanges> {
        // 任一条件更新失败时事务随 tx 一起丢弃并回滚
        let mut tx = self.pool.begin().await.map_err(SchedulerError::Database)?;
        let mut committed = CommittedChanges::default();

        for worker in &changes.workers {
            committed.workers.push(update_worker_on(&mut tx, worker).await?);
        }
        for job in &changes.jobs {
            committed.jobs.push(update_job_on(&mut tx, job).await?);
        }

        tx.commit().await.map_err(SchedulerError::Database)?;

        debug!(
            "提交变更: {} 个Worker, {} 个任务",
            committed.workers.len(),
            committed.jobs.len()
        );
        Ok(committed)
    }
}
