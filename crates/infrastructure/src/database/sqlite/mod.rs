pub mod sqlite_calendar_repository;
pub mod sqlite_job_repository;
pub mod sqlite_unit_of_work;
pub mod sqlite_worker_repository;

use scheduler_config::DatabaseConfig;
use scheduler_errors::SchedulerResult;
use sqlx::SqlitePool;

use super::manager::DatabaseManager;

/// 基于SQLite的仓储实现
///
/// 同一个结构体实现全部仓储接口与 [`scheduler_domain::UnitOfWork`]，
/// 条件写入统一使用 `WHERE id = ? AND version = ?`。
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 建立连接池并初始化表结构
    pub async fn connect(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let manager = DatabaseManager::new(config).await?;
        manager.migrate().await?;
        Ok(Self::new(manager.pool().clone()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
