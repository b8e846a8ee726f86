//! SQLite行与领域实体之间的转换
//!
//! 集合类字段（能力、节假日、工作日）与任务负载以JSON文本保存。

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use scheduler_domain::{
    BusinessDays, Calendar, CalendarRecord, Job, JobStatus, Worker, WorkerCapabilities,
    WorkerRecord, WorkerStatus,
};
use scheduler_errors::{SchedulerError, SchedulerResult};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

pub const WORKER_COLUMNS: &str = "id, tenant_id, name, capabilities, heartbeat_at, status, \
     max_parallel, current_jobs, version, registered_at";

pub const JOB_COLUMNS: &str = "id, tenant_id, queue, job_key, payload, priority, calendar_key, \
     not_before, due_at, status, assigned_worker_id, attempt, max_attempts, last_error, \
     cancel_requested, version, created_at, updated_at, started_at, finished_at";

pub const CALENDAR_COLUMNS: &str =
    "tenant_id, key, version, name, holidays, business_days, created_at";

/// 全局日历在表中以空字符串作为租户
pub fn tenant_column(tenant_id: Option<&str>) -> &str {
    tenant_id.unwrap_or("")
}

/// 主键或唯一约束冲突
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn to_json<T: Serialize>(value: &T, field_name: &str) -> SchedulerResult<String> {
        serde_json::to_string(value)
            .map_err(|e| SchedulerError::Serialization(format!("序列化{field_name}失败: {e}")))
    }

    pub fn from_json<T: DeserializeOwned>(row: &SqliteRow, field_name: &str) -> SchedulerResult<T> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str)
            .map_err(|e| SchedulerError::Serialization(format!("解析{field_name}失败: {e}")))
    }

    pub fn get_u32(row: &SqliteRow, field_name: &str) -> SchedulerResult<u32> {
        let value: i64 = row.try_get(field_name)?;
        u32::try_from(value).map_err(|_| {
            SchedulerError::DatabaseOperation(format!("字段 {field_name} 超出范围: {value}"))
        })
    }

    pub fn due_at_millis(due_at: DateTime<Utc>) -> i64 {
        due_at.timestamp_millis()
    }

    pub fn row_to_worker(row: &SqliteRow) -> SchedulerResult<Worker> {
        let status: String = row.try_get("status")?;
        let capabilities: WorkerCapabilities = Self::from_json(row, "capabilities")?;

        Worker::from_record(WorkerRecord {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            name: row.try_get("name")?,
            capabilities,
            heartbeat_at: row.try_get("heartbeat_at")?,
            status: status.parse::<WorkerStatus>()?,
            max_parallel: Self::get_u32(row, "max_parallel")?,
            current_jobs: Self::get_u32(row, "current_jobs")?,
            version: row.try_get("version")?,
            registered_at: row.try_get("registered_at")?,
        })
    }

    pub fn row_to_job(row: &SqliteRow) -> SchedulerResult<Job> {
        let status: String = row.try_get("status")?;
        let payload: serde_json::Value = Self::from_json(row, "payload")?;

        Ok(Job {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            queue: row.try_get("queue")?,
            job_key: row.try_get("job_key")?,
            payload,
            priority: row.try_get("priority")?,
            calendar_key: row.try_get("calendar_key")?,
            not_before: row.try_get("not_before")?,
            due_at: row.try_get("due_at")?,
            status: status.parse::<JobStatus>()?,
            assigned_worker_id: row.try_get("assigned_worker_id")?,
            attempt: Self::get_u32(row, "attempt")?,
            max_attempts: Self::get_u32(row, "max_attempts")?,
            last_error: row.try_get("last_error")?,
            cancel_requested: row.try_get("cancel_requested")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    pub fn row_to_calendar(row: &SqliteRow) -> SchedulerResult<Calendar> {
        let tenant_id: String = row.try_get("tenant_id")?;
        let holidays: BTreeSet<NaiveDate> = Self::from_json(row, "holidays")?;
        let business_days: BusinessDays = Self::from_json(row, "business_days")?;

        Calendar::from_record(CalendarRecord {
            tenant_id: (!tenant_id.is_empty()).then_some(tenant_id),
            key: row.try_get("key")?,
            name: row.try_get("name")?,
            holidays,
            business_days,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
