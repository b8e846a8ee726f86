use std::str::FromStr;
use std::time::Duration;

use scheduler_config::DatabaseConfig;
use scheduler_errors::{SchedulerError, SchedulerResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// 建表语句，按顺序执行，全部幂等
const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS calendars (
        tenant_id     TEXT    NOT NULL DEFAULT '',
        key           TEXT    NOT NULL,
        version       INTEGER NOT NULL,
        name          TEXT    NOT NULL,
        holidays      TEXT    NOT NULL,
        business_days TEXT    NOT NULL,
        created_at    TEXT    NOT NULL,
        PRIMARY KEY (tenant_id, key, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        id            TEXT    PRIMARY KEY,
        tenant_id     TEXT,
        name          TEXT    NOT NULL,
        capabilities  TEXT    NOT NULL,
        heartbeat_at  TEXT    NOT NULL,
        status        TEXT    NOT NULL,
        max_parallel  INTEGER NOT NULL CHECK (max_parallel >= 1),
        current_jobs  INTEGER NOT NULL CHECK (current_jobs >= 0 AND current_jobs <= max_parallel),
        version       INTEGER NOT NULL,
        registered_at TEXT    NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id          TEXT    NOT NULL,
        queue              TEXT    NOT NULL,
        job_key            TEXT    NOT NULL,
        payload            TEXT    NOT NULL,
        priority           INTEGER NOT NULL,
        calendar_key       TEXT    NOT NULL,
        not_before         TEXT,
        due_at             TEXT    NOT NULL,
        due_at_ms          INTEGER NOT NULL,
        status             TEXT    NOT NULL,
        assigned_worker_id TEXT,
        attempt            INTEGER NOT NULL,
        max_attempts       INTEGER NOT NULL,
        last_error         TEXT,
        cancel_requested   INTEGER NOT NULL DEFAULT 0,
        version            INTEGER NOT NULL,
        created_at         TEXT    NOT NULL,
        updated_at         TEXT    NOT NULL,
        started_at         TEXT,
        finished_at        TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_dispatch ON jobs (status, due_at_ms, priority)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_worker ON jobs (assigned_worker_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_workers_heartbeat ON workers (status, heartbeat_at)",
];

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(SchedulerError::Database)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800))
            .connect_with(options)
            .await
            .map_err(SchedulerError::Database)?;

        info!("数据库连接池已建立: {}", config.url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(SchedulerError::Database)?;
        }
        debug!("数据库结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
