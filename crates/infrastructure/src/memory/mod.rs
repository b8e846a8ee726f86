//! 进程内存储
//!
//! 所有记录放在同一把读写锁之后，条件写入在持有写锁期间完成版本比对，
//! 因此多记录提交天然是原子的。适用于单进程部署与测试。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_domain::{
    Calendar, CalendarRepository, ChangeSet, CommittedChanges, Job, JobRepository, JobStatus,
    UnitOfWork, Worker, WorkerRepository,
};
use scheduler_errors::{SchedulerError, SchedulerResult};
use tokio::sync::RwLock;
use tracing::debug;

type CalendarKey = (Option<String>, String);

#[derive(Debug, Default)]
struct StoreState {
    /// 每个日历键下按版本升序保存全部版本
    calendars: BTreeMap<CalendarKey, Vec<Calendar>>,
    workers: HashMap<String, Worker>,
    jobs: BTreeMap<i64, Job>,
    next_job_id: i64,
}

impl StoreState {
    fn check_worker(&self, worker: &Worker) -> SchedulerResult<()> {
        match self.workers.get(worker.id()) {
            None => Err(SchedulerError::worker_not_found(worker.id())),
            Some(stored) if stored.version() != worker.version() => Err(
                SchedulerError::version_conflict("worker", worker.id(), worker.version()),
            ),
            Some(_) => Ok(()),
        }
    }

    fn check_job(&self, job: &Job) -> SchedulerResult<()> {
        match self.jobs.get(&job.id) {
            None => Err(SchedulerError::job_not_found(job.id)),
            Some(stored) if stored.version != job.version => {
                Err(SchedulerError::version_conflict("job", job.id, job.version))
            }
            Some(_) => Ok(()),
        }
    }

    fn put_worker(&mut self, worker: &Worker) -> Worker {
        let stored = worker.with_version(worker.version() + 1);
        self.workers.insert(stored.id().to_string(), stored.clone());
        stored
    }

    fn put_job(&mut self, job: &Job) -> Job {
        let stored = job.with_version(job.version + 1);
        self.jobs.insert(stored.id, stored.clone());
        stored
    }
}

/// 基于内存的仓储实现
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn calendar_key(tenant_id: Option<&str>, key: &str) -> CalendarKey {
    (tenant_id.map(str::to_string), key.to_string())
}

#[async_trait]
impl CalendarRepository for InMemoryStore {
    async fn create(&self, calendar: &Calendar) -> SchedulerResult<Calendar> {
        if calendar.version() != 1 {
            return Err(SchedulerError::validation_error("新建日历的版本必须为1"));
        }
        self.publish(calendar).await
    }

    async fn find_latest(
        &self,
        tenant_id: Option<&str>,
        key: &str,
    ) -> SchedulerResult<Option<Calendar>> {
        let state = self.state.read().await;
        Ok(state
            .calendars
            .get(&calendar_key(tenant_id, key))
            .and_then(|versions| versions.last().cloned()))
    }

    async fn find_version(
        &self,
        tenant_id: Option<&str>,
        key: &str,
        version: i64,
    ) -> SchedulerResult<Option<Calendar>> {
        let state = self.state.read().await;
        Ok(state
            .calendars
            .get(&calendar_key(tenant_id, key))
            .and_then(|versions| versions.iter().find(|c| c.version() == version).cloned()))
    }

    async fn list_versions(
        &self,
        tenant_id: Option<&str>,
        key: &str,
    ) -> SchedulerResult<Vec<Calendar>> {
        let state = self.state.read().await;
        Ok(state
            .calendars
            .get(&calendar_key(tenant_id, key))
            .cloned()
            .unwrap_or_default())
    }

    async fn publish(&self, calendar: &Calendar) -> SchedulerResult<Calendar> {
        let mut state = self.state.write().await;
        let versions = state
            .calendars
            .entry(calendar_key(calendar.tenant_id(), calendar.key()))
            .or_default();
        let latest = versions.last().map(Calendar::version).unwrap_or(0);

        if calendar.version() != latest + 1 {
            return Err(SchedulerError::version_conflict(
                "calendar",
                calendar.key(),
                calendar.version() - 1,
            ));
        }
        versions.push(calendar.clone());

        debug!("发布日历 {} 版本 {}", calendar.key(), calendar.version());
        Ok(calendar.clone())
    }
}

#[async_trait]
impl WorkerRepository for InMemoryStore {
    async fn register(&self, worker: &Worker) -> SchedulerResult<Worker> {
        let mut state = self.state.write().await;
        if state.workers.contains_key(worker.id()) {
            return Err(SchedulerError::version_conflict("worker", worker.id(), 0));
        }
        let stored = worker.with_version(1);
        state.workers.insert(stored.id().to_string(), stored.clone());

        debug!("注册Worker成功: {}", stored.id());
        Ok(stored)
    }

    async fn find_by_id(&self, id: &str) -> SchedulerResult<Option<Worker>> {
        Ok(self.state.read().await.workers.get(id).cloned())
    }

    async fn find_all(&self) -> SchedulerResult<Vec<Worker>> {
        let state = self.state.read().await;
        let mut workers: Vec<Worker> = state.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(workers)
    }

    async fn update(&self, worker: &Worker) -> SchedulerResult<Worker> {
        let mut state = self.state.write().await;
        state.check_worker(worker)?;
        Ok(state.put_worker(worker))
    }

    async fn unregister(&self, id: &str, expected_version: i64) -> SchedulerResult<bool> {
        let mut state = self.state.write().await;
        match state.workers.get(id) {
            None => Ok(false),
            Some(stored) if stored.version() != expected_version => Err(
                SchedulerError::version_conflict("worker", id, expected_version),
            ),
            Some(_) => {
                state.workers.remove(id);
                debug!("注销Worker成功: {}", id);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn create(&self, job: &Job) -> SchedulerResult<Job> {
        let mut state = self.state.write().await;
        state.next_job_id += 1;
        let stored = job.with_id(state.next_job_id).with_version(1);
        state.jobs.insert(stored.id, stored.clone());

        debug!("创建任务成功: {}", stored.id);
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> SchedulerResult<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn find_dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.is_dispatchable(now))
            .cloned()
            .collect();
        jobs.sort_by(Job::dispatch_order);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn find_active_by_worker(&self, worker_id: &str) -> SchedulerResult<Vec<Job>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| job.is_active() && job.assigned_worker_id.as_deref() == Some(worker_id))
            .cloned()
            .collect())
    }

    async fn find_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> SchedulerResult<Vec<Job>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, job: &Job) -> SchedulerResult<Job> {
        let mut state = self.state.write().await;
        state.check_job(job)?;
        Ok(state.put_job(job))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    async fn commit(&self, changes: ChangeSet) -> SchedulerResult<CommittedChanges> {
        let mut state = self.state.write().await;

        for worker in &changes.workers {
            state.check_worker(worker)?;
        }
        for job in &changes.jobs {
            state.check_job(job)?;
        }

        let workers = changes
            .workers
            .iter()
            .map(|worker| state.put_worker(worker))
            .collect();
        let jobs = changes.jobs.iter().map(|job| state.put_job(job)).collect();

        Ok(CommittedChanges { workers, jobs })
    }
}
