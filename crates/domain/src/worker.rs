use chrono::{DateTime, Utc};
use scheduler_errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::WorkerCapabilities;

/// 心跳超时的默认阈值（秒）
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "MAINTENANCE")]
    Maintenance,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "ONLINE",
            WorkerStatus::Offline => "OFFLINE",
            WorkerStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ONLINE" => Ok(WorkerStatus::Online),
            "OFFLINE" => Ok(WorkerStatus::Offline),
            "MAINTENANCE" => Ok(WorkerStatus::Maintenance),
            _ => Err(SchedulerError::validation_error(format!(
                "Invalid worker status: {s}"
            ))),
        }
    }
}

/// Worker进程注册时提交的信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub name: String,
    pub capabilities: WorkerCapabilities,
    pub max_parallel: u32,
}

/// 存储与传输使用的Worker记录，反序列化时经过 [`Worker`] 的校验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub tenant_id: Option<String>,
    pub name: String,
    pub capabilities: WorkerCapabilities,
    pub heartbeat_at: DateTime<Utc>,
    pub status: WorkerStatus,
    pub max_parallel: u32,
    pub current_jobs: u32,
    pub version: i64,
    pub registered_at: DateTime<Utc>,
}

/// 一个执行代理的能力与容量快照
///
/// 所有状态变化都返回新的实例，`version` 由存储层在提交时递增。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorkerRecord", into = "WorkerRecord")]
pub struct Worker {
    id: String,
    tenant_id: Option<String>,
    name: String,
    capabilities: WorkerCapabilities,
    heartbeat_at: DateTime<Utc>,
    status: WorkerStatus,
    max_parallel: u32,
    current_jobs: u32,
    version: i64,
    registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn register(registration: WorkerRegistration, now: DateTime<Utc>) -> SchedulerResult<Self> {
        Self::from_record(WorkerRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: registration.tenant_id,
            name: registration.name,
            capabilities: registration.capabilities,
            heartbeat_at: now,
            status: WorkerStatus::Online,
            max_parallel: registration.max_parallel,
            current_jobs: 0,
            version: 0,
            registered_at: now,
        })
    }

    /// 校验并还原Worker；`current_jobs` 越界说明上游记账有缺陷，直接拒绝
    pub fn from_record(record: WorkerRecord) -> SchedulerResult<Self> {
        if record.id.trim().is_empty() {
            return Err(SchedulerError::validation_error("worker.id 不能为空"));
        }
        if record.name.trim().is_empty() {
            return Err(SchedulerError::validation_error("worker.name 不能为空"));
        }
        record.capabilities.validate()?;

        let max_parallel = record.max_parallel.max(1);
        if record.current_jobs > max_parallel {
            return Err(SchedulerError::capacity_violation(format!(
                "Worker {} current_jobs={} 超出 max_parallel={}",
                record.id, record.current_jobs, max_parallel
            )));
        }

        Ok(Self {
            id: record.id,
            tenant_id: record.tenant_id,
            name: record.name,
            capabilities: record.capabilities,
            heartbeat_at: record.heartbeat_at,
            status: record.status,
            max_parallel,
            current_jobs: record.current_jobs,
            version: record.version,
            registered_at: record.registered_at,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn capabilities(&self) -> &WorkerCapabilities {
        &self.capabilities
    }
    pub fn heartbeat_at(&self) -> DateTime<Utc> {
        self.heartbeat_at
    }
    pub fn status(&self) -> WorkerStatus {
        self.status
    }
    pub fn max_parallel(&self) -> u32 {
        self.max_parallel
    }
    pub fn current_jobs(&self) -> u32 {
        self.current_jobs
    }
    pub fn version(&self) -> i64 {
        self.version
    }
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn is_online(&self) -> bool {
        matches!(self.status, WorkerStatus::Online)
    }

    pub fn can_handle_queue(&self, queue: &str) -> bool {
        self.capabilities.queues.matches(queue)
    }

    pub fn can_handle_job(&self, job_key: &str) -> bool {
        self.capabilities.job_keys.matches(job_key)
    }

    /// 准入判断：在线、有空闲槽位、能力匹配
    pub fn can_accept_job(&self, queue: &str, job_key: Option<&str>) -> bool {
        self.is_online()
            && self.current_jobs < self.max_parallel
            && self.can_handle_queue(queue)
            && job_key.map_or(true, |key| self.can_handle_job(key))
    }

    /// 租户隔离：共享Worker服务所有租户，租户专属Worker只服务本租户
    pub fn serves_tenant(&self, tenant_id: &str) -> bool {
        self.tenant_id.as_deref().map_or(true, |t| t == tenant_id)
    }

    pub fn is_healthy(&self, timeout_seconds: i64) -> bool {
        self.is_healthy_at(timeout_seconds, Utc::now())
    }

    pub fn is_healthy_at(&self, timeout_seconds: i64, now: DateTime<Utc>) -> bool {
        (now - self.heartbeat_at).num_seconds() <= timeout_seconds
    }

    pub fn available_slots(&self) -> u32 {
        self.max_parallel.saturating_sub(self.current_jobs)
    }

    pub fn utilization_percentage(&self) -> f64 {
        (self.current_jobs as f64 / self.max_parallel as f64) * 100.0
    }

    /// 刷新心跳并强制回到在线状态
    pub fn heartbeat(&self, now: DateTime<Utc>) -> Worker {
        Worker {
            heartbeat_at: now,
            status: WorkerStatus::Online,
            ..self.clone()
        }
    }

    pub fn go_online(&self) -> Worker {
        self.with_status(WorkerStatus::Online)
    }

    pub fn go_offline(&self) -> Worker {
        self.with_status(WorkerStatus::Offline)
    }

    pub fn enter_maintenance(&self) -> Worker {
        self.with_status(WorkerStatus::Maintenance)
    }

    pub fn with_status(&self, status: WorkerStatus) -> Worker {
        Worker {
            status,
            ..self.clone()
        }
    }

    pub fn start_job(&self) -> SchedulerResult<Worker> {
        if self.current_jobs >= self.max_parallel {
            return Err(SchedulerError::capacity_violation(format!(
                "Worker {} 已满载 ({}/{})，不能再启动任务",
                self.id, self.current_jobs, self.max_parallel
            )));
        }
        Ok(Worker {
            current_jobs: self.current_jobs + 1,
            ..self.clone()
        })
    }

    pub fn finish_job(&self) -> SchedulerResult<Worker> {
        if self.current_jobs == 0 {
            return Err(SchedulerError::capacity_violation(format!(
                "Worker {} 没有运行中的任务，不能结束任务",
                self.id
            )));
        }
        Ok(Worker {
            current_jobs: self.current_jobs - 1,
            ..self.clone()
        })
    }

    /// 释放全部槽位，仅用于失效恢复
    pub fn release_all_jobs(&self) -> Worker {
        Worker {
            current_jobs: 0,
            ..self.clone()
        }
    }

    /// 存储层提交成功后写入新版本号
    pub fn with_version(&self, version: i64) -> Worker {
        Worker {
            version,
            ..self.clone()
        }
    }

    pub fn entity_description(&self) -> String {
        format!(
            "Worker '{}' (ID: {}, 状态: {}, 负载: {}/{})",
            self.name, self.id, self.status, self.current_jobs, self.max_parallel
        )
    }
}

impl TryFrom<WorkerRecord> for Worker {
    type Error = SchedulerError;

    fn try_from(record: WorkerRecord) -> Result<Self, Self::Error> {
        Worker::from_record(record)
    }
}

impl From<Worker> for WorkerRecord {
    fn from(worker: Worker) -> Self {
        Self {
            id: worker.id,
            tenant_id: worker.tenant_id,
            name: worker.name,
            capabilities: worker.capabilities,
            heartbeat_at: worker.heartbeat_at,
            status: worker.status,
            max_parallel: worker.max_parallel,
            current_jobs: worker.current_jobs,
            version: worker.version,
            registered_at: worker.registered_at,
        }
    }
}
