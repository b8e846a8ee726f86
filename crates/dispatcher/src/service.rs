//! 调度核心的对外操作
//!
//! API层与测试都通过 [`SchedulerService`] 访问任务提交、Worker注册与心跳、
//! 结果上报以及日历管理。所有读-改-写操作在版本冲突时重新读取并有限次重试。

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use scheduler_config::{AppConfig, DispatcherConfig, HealthMonitorConfig, RetryConfig};
use scheduler_domain::{
    BusinessDays, Calendar, Job, JobOutcome, JobStatus, JobSubmission, Repositories, Worker,
    WorkerRegistration, WorkerStatus,
};
use scheduler_errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calendar_resolver::CalendarResolver;
use crate::completion::CompletionHandler;
use crate::dispatcher::Dispatcher;
use crate::health_monitor::HealthMonitor;
use crate::retry_policy::RetryPolicy;
use crate::MAX_CONFLICT_RETRIES;

/// 心跳应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub acknowledged: bool,
    /// 该Worker名下已请求取消、需要尽快停止的任务
    pub cancel_requested_job_ids: Vec<i64>,
}

/// 新建日历的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarDefinition {
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
    #[serde(default)]
    pub business_days: Option<BusinessDays>,
}

pub struct SchedulerService {
    repos: Repositories,
    resolver: CalendarResolver,
    dispatcher: Arc<Dispatcher>,
    health_monitor: Arc<HealthMonitor>,
    completion: CompletionHandler,
    retry_config: RetryConfig,
}

impl SchedulerService {
    pub fn new(
        repos: Repositories,
        dispatcher_config: DispatcherConfig,
        health_config: HealthMonitorConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            resolver: CalendarResolver::new(repos.calendars.clone()),
            dispatcher: Arc::new(Dispatcher::new(repos.clone(), dispatcher_config)),
            health_monitor: Arc::new(HealthMonitor::new(repos.clone(), health_config)),
            completion: CompletionHandler::new(repos.clone(), RetryPolicy::new(retry_config.clone())),
            retry_config,
            repos,
        }
    }

    pub fn from_config(repos: Repositories, config: &AppConfig) -> Self {
        Self::new(
            repos,
            config.dispatcher.clone(),
            config.health_monitor.clone(),
            config.retry.clone(),
        )
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn health_monitor(&self) -> Arc<HealthMonitor> {
        self.health_monitor.clone()
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    // ---- 任务 ----

    /// 提交任务，到期时间对齐到所用日历的工作日
    pub async fn submit_job(
        &self,
        submission: JobSubmission,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Job> {
        submission.validate()?;
        let calendar = self
            .resolver
            .resolve(&submission.tenant_id, submission.calendar_key())
            .await?;
        let due_at = calendar.align_to_working_day(submission.not_before.unwrap_or(now))?;

        let job = Job::new(submission, due_at, self.retry_config.default_max_attempts, now)?;
        let created = self.repos.jobs.create(&job).await?;

        metrics::counter!("scheduler_jobs_submitted_total").increment(1);
        info!(
            "任务 {} 已提交: 租户 {}, 队列 {}, 类型 {}, 到期时间 {}",
            created.id,
            created.tenant_id,
            created.queue,
            created.job_key,
            created.due_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        Ok(created)
    }

    pub async fn get_job(&self, job_id: i64) -> SchedulerResult<Job> {
        self.repos
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| SchedulerError::job_not_found(job_id))
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> SchedulerResult<Vec<Job>> {
        self.repos.jobs.find_by_status(status, limit).await
    }

    /// 协作式取消：排队中的任务立即取消，执行中的任务只打标记
    pub async fn cancel_job(&self, job_id: i64, now: DateTime<Utc>) -> SchedulerResult<Job> {
        let mut last_conflict = None;
        for _ in 0..MAX_CONFLICT_RETRIES {
            let job = self.get_job(job_id).await?;
            let cancelled = job.cancel(now)?;
            match self.repos.jobs.update(&cancelled).await {
                Ok(updated) => {
                    if updated.status == JobStatus::Cancelled {
                        info!("任务 {} 已取消", job_id);
                    } else {
                        info!("任务 {} 正在执行，已请求Worker停止", job_id);
                    }
                    return Ok(updated);
                }
                Err(e) if e.is_conflict() => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| SchedulerError::version_conflict("job", job_id, 0)))
    }

    pub async fn start_job(
        &self,
        worker_id: &str,
        job_id: i64,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Job> {
        self.completion.start_job(worker_id, job_id, now).await
    }

    pub async fn claim_result(
        &self,
        worker_id: &str,
        job_id: i64,
        outcome: JobOutcome,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Job> {
        self.completion
            .claim_result(worker_id, job_id, outcome, now)
            .await
    }

    // ---- Worker ----

    pub async fn register_worker(
        &self,
        registration: WorkerRegistration,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Worker> {
        let worker = Worker::register(registration, now)?;
        let registered = self.repos.workers.register(&worker).await?;
        info!("Worker注册成功: {}", registered.entity_description());
        Ok(registered)
    }

    pub async fn get_worker(&self, worker_id: &str) -> SchedulerResult<Worker> {
        self.repos
            .workers
            .find_by_id(worker_id)
            .await?
            .ok_or_else(|| SchedulerError::worker_not_found(worker_id))
    }

    pub async fn list_workers(&self) -> SchedulerResult<Vec<Worker>> {
        self.repos.workers.find_all().await
    }

    /// 注销Worker，先把其名下任务放回队列
    ///
    /// 删除以离线后读到的版本为条件。其间若心跳或派发改动了Worker，
    /// 删除失败并重新离线，不会留下指向已删除Worker的任务。
    pub async fn deregister_worker(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let mut last_conflict = None;
        for _ in 0..MAX_CONFLICT_RETRIES {
            if self
                .health_monitor
                .take_offline(worker_id, now, false)
                .await?
                .is_none()
            {
                return Err(SchedulerError::worker_not_found(worker_id));
            }

            let worker = self.get_worker(worker_id).await?;
            if worker.status() != WorkerStatus::Offline || worker.current_jobs() > 0 {
                debug!("Worker {} 离线后又被修改，重新处理", worker_id);
                last_conflict = Some(SchedulerError::version_conflict(
                    "worker",
                    worker_id,
                    worker.version(),
                ));
                continue;
            }

            match self.repos.workers.unregister(worker_id, worker.version()).await {
                Ok(true) => {
                    info!("Worker {} 已注销", worker_id);
                    return Ok(());
                }
                Ok(false) => return Err(SchedulerError::worker_not_found(worker_id)),
                Err(e) if e.is_conflict() => {
                    debug!("注销Worker {} 版本冲突，重新处理: {}", worker_id, e);
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict
            .unwrap_or_else(|| SchedulerError::version_conflict("worker", worker_id, 0)))
    }

    /// 刷新心跳并返回需要停止的任务
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> SchedulerResult<HeartbeatAck> {
        let mut last_conflict = None;
        let mut refreshed = None;
        for _ in 0..MAX_CONFLICT_RETRIES {
            let worker = self.get_worker(worker_id).await?;
            let was_online = worker.is_online();
            match self.repos.workers.update(&worker.heartbeat(now)).await {
                Ok(updated) => {
                    if !was_online {
                        info!("Worker {} 通过心跳恢复在线", worker_id);
                    }
                    refreshed = Some(updated);
                    break;
                }
                Err(e) if e.is_conflict() => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }
        if refreshed.is_none() {
            return Err(last_conflict
                .unwrap_or_else(|| SchedulerError::version_conflict("worker", worker_id, 0)));
        }

        let cancel_requested_job_ids = self
            .repos
            .jobs
            .find_active_by_worker(worker_id)
            .await?
            .into_iter()
            .filter(|job| job.cancel_requested)
            .map(|job| job.id)
            .collect();

        debug!("收到Worker {} 心跳", worker_id);
        Ok(HeartbeatAck {
            acknowledged: true,
            cancel_requested_job_ids,
        })
    }

    /// 运维状态切换。置为离线时按失联处理，名下任务重新排队
    pub async fn set_worker_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Worker> {
        if status == WorkerStatus::Offline {
            if self
                .health_monitor
                .take_offline(worker_id, now, false)
                .await?
                .is_none()
            {
                return Err(SchedulerError::worker_not_found(worker_id));
            }
            info!("Worker {} 被手动置为离线", worker_id);
            return self.get_worker(worker_id).await;
        }

        let mut last_conflict = None;
        for _ in 0..MAX_CONFLICT_RETRIES {
            let worker = self.get_worker(worker_id).await?;
            if worker.status() == status {
                return Ok(worker);
            }
            match self.repos.workers.update(&worker.with_status(status)).await {
                Ok(updated) => {
                    info!("Worker {} 状态: {} -> {}", worker_id, worker.status(), status);
                    return Ok(updated);
                }
                Err(e) if e.is_conflict() => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict
            .unwrap_or_else(|| SchedulerError::version_conflict("worker", worker_id, 0)))
    }

    // ---- 日历 ----

    pub async fn create_calendar(&self, definition: CalendarDefinition) -> SchedulerResult<Calendar> {
        let calendar = Calendar::new(
            definition.tenant_id,
            definition.key,
            definition.name,
            definition.holidays,
            definition.business_days.unwrap_or_default(),
        )?;
        let created = self.repos.calendars.create(&calendar).await?;
        info!(
            "创建日历 {} (租户: {})",
            created.key(),
            created.tenant_id().unwrap_or("全局")
        );
        Ok(created)
    }

    pub async fn get_calendar(
        &self,
        tenant_id: Option<&str>,
        key: &str,
        version: Option<i64>,
    ) -> SchedulerResult<Calendar> {
        let found = match version {
            Some(version) => self.repos.calendars.find_version(tenant_id, key, version).await?,
            None => self.repos.calendars.find_latest(tenant_id, key).await?,
        };
        found.ok_or_else(|| SchedulerError::calendar_not_found(key))
    }

    pub async fn list_calendar_versions(
        &self,
        tenant_id: Option<&str>,
        key: &str,
    ) -> SchedulerResult<Vec<Calendar>> {
        self.repos.calendars.list_versions(tenant_id, key).await
    }

    /// 任务提交时实际使用的日历
    pub async fn resolve_calendar(&self, tenant_id: &str, key: &str) -> SchedulerResult<Calendar> {
        self.resolver.resolve(tenant_id, key).await
    }

    pub async fn update_holidays(
        &self,
        tenant_id: Option<&str>,
        key: &str,
        holidays: Vec<NaiveDate>,
    ) -> SchedulerResult<Calendar> {
        self.publish_next(tenant_id, key, |latest| {
            latest.update_holidays(holidays.iter().copied())
        })
        .await
    }

    pub async fn update_business_days(
        &self,
        tenant_id: Option<&str>,
        key: &str,
        business_days: BusinessDays,
    ) -> SchedulerResult<Calendar> {
        self.publish_next(tenant_id, key, |latest| {
            latest.update_business_days(business_days)
        })
        .await
    }

    async fn publish_next<F>(
        &self,
        tenant_id: Option<&str>,
        key: &str,
        next: F,
    ) -> SchedulerResult<Calendar>
    where
        F: Fn(&Calendar) -> SchedulerResult<Calendar>,
    {
        let mut last_conflict = None;
        for _ in 0..MAX_CONFLICT_RETRIES {
            let latest = self.get_calendar(tenant_id, key, None).await?;
            let candidate = next(&latest)?;
            match self.repos.calendars.publish(&candidate).await {
                Ok(published) => {
                    info!("日历 {} 发布版本 {}", key, published.version());
                    return Ok(published);
                }
                Err(e) if e.is_conflict() => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| SchedulerError::version_conflict("calendar", key, 0)))
    }
}
