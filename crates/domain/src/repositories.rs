//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则。所有更新都以记录当前的
//! `version` 作为期望版本做条件写入，版本不符时返回 `VersionConflict`。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_errors::SchedulerResult;

use crate::calendar::Calendar;
use crate::job::{Job, JobStatus};
use crate::worker::Worker;

/// 日历仓储抽象，按 `(tenant_id, key)` 保存全部历史版本
#[async_trait]
pub trait CalendarRepository: Send + Sync {
    /// 保存第一个版本；同键日历已存在时返回版本冲突
    async fn create(&self, calendar: &Calendar) -> SchedulerResult<Calendar>;
    async fn find_latest(
        &self,
        tenant_id: Option<&str>,
        key: &str,
    ) -> SchedulerResult<Option<Calendar>>;
    async fn find_version(
        &self,
        tenant_id: Option<&str>,
        key: &str,
        version: i64,
    ) -> SchedulerResult<Option<Calendar>>;
    async fn list_versions(&self, tenant_id: Option<&str>, key: &str)
        -> SchedulerResult<Vec<Calendar>>;
    /// 发布新版本，要求 `calendar.version == 最新版本 + 1`
    async fn publish(&self, calendar: &Calendar) -> SchedulerResult<Calendar>;
}

/// Worker仓储抽象
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn register(&self, worker: &Worker) -> SchedulerResult<Worker>;
    async fn find_by_id(&self, id: &str) -> SchedulerResult<Option<Worker>>;
    async fn find_all(&self) -> SchedulerResult<Vec<Worker>>;
    /// 条件更新，成功后返回版本号加一的记录
    async fn update(&self, worker: &Worker) -> SchedulerResult<Worker>;
    /// 按版本条件删除；记录不存在返回 `false`，版本不符返回 `VersionConflict`
    async fn unregister(&self, id: &str, expected_version: i64) -> SchedulerResult<bool>;
}

/// 任务仓储抽象
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 分配id并保存
    async fn create(&self, job: &Job) -> SchedulerResult<Job>;
    async fn find_by_id(&self, id: i64) -> SchedulerResult<Option<Job>>;
    /// 已到期的 Pending/Retrying 任务，按派发顺序排列
    async fn find_dispatchable(&self, now: DateTime<Utc>, limit: usize)
        -> SchedulerResult<Vec<Job>>;
    /// 分配给某Worker且处于 Assigned/Running 的任务
    async fn find_active_by_worker(&self, worker_id: &str) -> SchedulerResult<Vec<Job>>;
    async fn find_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> SchedulerResult<Vec<Job>>;
    async fn update(&self, job: &Job) -> SchedulerResult<Job>;
}

/// 需要一起提交的一组记录
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub workers: Vec<Worker>,
    pub jobs: Vec<Job>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, worker: Worker) -> Self {
        self.workers.push(worker);
        self
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty() && self.jobs.is_empty()
    }
}

/// 提交后的记录，版本号已递增，顺序与 [`ChangeSet`] 一致
#[derive(Debug, Clone, Default)]
pub struct CommittedChanges {
    pub workers: Vec<Worker>,
    pub jobs: Vec<Job>,
}

/// 多条记录的原子条件写入：全部版本匹配才全部生效
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn commit(&self, changes: ChangeSet) -> SchedulerResult<CommittedChanges>;
}

/// 注入调度组件的仓储集合
#[derive(Clone)]
pub struct Repositories {
    pub calendars: Arc<dyn CalendarRepository>,
    pub workers: Arc<dyn WorkerRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub unit_of_work: Arc<dyn UnitOfWork>,
}

impl Repositories {
    /// 由同时实现全部仓储接口的存储构造
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CalendarRepository + WorkerRepository + JobRepository + UnitOfWork + 'static,
    {
        Self {
            calendars: store.clone(),
            workers: store.clone(),
            jobs: store.clone(),
            unit_of_work: store,
        }
    }
}
