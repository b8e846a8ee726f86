//! 派发循环
//!
//! 每一轮取出已到期的排队任务，按 `(priority desc, due_at asc, id asc)` 顺序
//! 为每个任务挑选一个准入通过的Worker，并把“任务置为Assigned”和
//! “Worker占用一个槽位”作为同一次条件提交写入存储。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scheduler_config::DispatcherConfig;
use scheduler_domain::{ChangeSet, Job, Repositories, Worker};
use scheduler_errors::{SchedulerError, SchedulerResult};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::strategies::{strategy_for, WorkerSelectionStrategy};

/// 单个任务在本轮的派发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Assigned { worker_id: String },
    /// 没有准入通过的Worker，任务保持排队
    NoEligibleWorker,
    /// 冲突重试次数用尽，留到下一轮
    Deferred,
    /// 重新读取后发现任务已被其他操作处理
    Skipped,
}

/// 一轮派发的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub considered: usize,
    pub assigned: usize,
    pub unmatched: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub conflicts: usize,
    /// 连续找不到Worker的轮数达到告警阈值的任务数
    pub starved: usize,
}

pub struct Dispatcher {
    repos: Repositories,
    strategy: Arc<dyn WorkerSelectionStrategy>,
    config: DispatcherConfig,
    /// job_id -> 连续未匹配轮数
    starvation: Mutex<HashMap<i64, u32>>,
}

impl Dispatcher {
    pub fn new(repos: Repositories, config: DispatcherConfig) -> Self {
        let strategy = strategy_for(config.dispatch_strategy);
        Self::with_strategy(repos, config, strategy)
    }

    pub fn with_strategy(
        repos: Repositories,
        config: DispatcherConfig,
        strategy: Arc<dyn WorkerSelectionStrategy>,
    ) -> Self {
        Self {
            repos,
            strategy,
            config,
            starvation: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// 执行一轮派发
    pub async fn dispatch_tick(&self, now: DateTime<Utc>) -> SchedulerResult<DispatchReport> {
        let jobs = self
            .repos
            .jobs
            .find_dispatchable(now, self.config.max_jobs_per_tick)
            .await?;
        let mut report = DispatchReport {
            considered: jobs.len(),
            ..DispatchReport::default()
        };
        if jobs.is_empty() {
            self.record_starvation(&HashSet::new(), &mut report).await;
            return Ok(report);
        }

        let mut workers: HashMap<String, Worker> = self
            .repos
            .workers
            .find_all()
            .await?
            .into_iter()
            .map(|w| (w.id().to_string(), w))
            .collect();

        debug!(
            "本轮派发: {} 个到期任务, {} 个Worker, 策略 {}",
            jobs.len(),
            workers.len(),
            self.strategy.name()
        );

        let mut unmatched = HashSet::new();
        for job in jobs {
            let job_id = job.id;
            match self.assign_job(job, &mut workers, now, &mut report).await {
                Ok(AssignmentOutcome::Assigned { .. }) => report.assigned += 1,
                Ok(AssignmentOutcome::NoEligibleWorker) => {
                    report.unmatched += 1;
                    unmatched.insert(job_id);
                }
                Ok(AssignmentOutcome::Deferred) => report.deferred += 1,
                Ok(AssignmentOutcome::Skipped) => report.skipped += 1,
                Err(e) if e.is_fatal() => {
                    error!("派发任务 {} 时发现记账错误: {}", job_id, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("派发任务 {} 失败，留到下一轮: {}", job_id, e);
                    report.deferred += 1;
                }
            }
        }

        self.record_starvation(&unmatched, &mut report).await;

        if report.assigned > 0 || report.conflicts > 0 {
            info!(
                "派发完成: 分配 {} 个, 未匹配 {} 个, 延后 {} 个, 冲突 {} 次",
                report.assigned, report.unmatched, report.deferred, report.conflicts
            );
        }
        Ok(report)
    }

    /// 为单个任务选择Worker并原子提交，遇到版本冲突时重新读取后重试
    async fn assign_job(
        &self,
        mut job: Job,
        workers: &mut HashMap<String, Worker>,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> SchedulerResult<AssignmentOutcome> {
        for attempt in 1..=self.config.max_assign_attempts {
            let selected = {
                let mut candidates: Vec<&Worker> = workers
                    .values()
                    .filter(|w| {
                        w.serves_tenant(&job.tenant_id)
                            && w.can_accept_job(&job.queue, Some(&job.job_key))
                    })
                    .collect();
                candidates.sort_by(|a, b| a.id().cmp(b.id()));
                match self.strategy.select_worker(&job, &candidates) {
                    Some(worker) => worker.clone(),
                    None => {
                        debug!(
                            "任务 {} (队列 {}, 类型 {}) 暂无可用Worker",
                            job.id, job.queue, job.job_key
                        );
                        return Ok(AssignmentOutcome::NoEligibleWorker);
                    }
                }
            };

            let changes = ChangeSet::new()
                .with_worker(selected.start_job()?)
                .with_job(job.assign(selected.id(), now)?);

            match self.repos.unit_of_work.commit(changes).await {
                Ok(committed) => {
                    for worker in committed.workers {
                        workers.insert(worker.id().to_string(), worker);
                    }
                    metrics::counter!("scheduler_jobs_assigned_total").increment(1);
                    info!(
                        "任务 {} 已分配给Worker {} (第 {} 次尝试)",
                        job.id,
                        selected.id(),
                        job.attempt
                    );
                    return Ok(AssignmentOutcome::Assigned {
                        worker_id: selected.id().to_string(),
                    });
                }
                Err(e) if e.is_conflict() => {
                    report.conflicts += 1;
                    metrics::counter!("scheduler_dispatch_conflicts_total").increment(1);
                    debug!(
                        "分配任务 {} 给Worker {} 时版本冲突 ({}/{}): {}",
                        job.id,
                        selected.id(),
                        attempt,
                        self.config.max_assign_attempts,
                        e
                    );
                    match self.refresh(job.id, selected.id(), workers, now).await? {
                        Some(fresh) => job = fresh,
                        None => return Ok(AssignmentOutcome::Skipped),
                    }
                }
                Err(SchedulerError::WorkerNotFound { id }) => {
                    debug!("Worker {} 已注销，重新选择", id);
                    workers.remove(&id);
                }
                Err(SchedulerError::JobNotFound { .. }) => return Ok(AssignmentOutcome::Skipped),
                Err(e) => return Err(e),
            }
        }

        debug!("任务 {} 冲突重试次数用尽，留到下一轮", job.id);
        Ok(AssignmentOutcome::Deferred)
    }

    /// 冲突后重新读取Worker与任务；任务已不可派发时返回 `None`
    async fn refresh(
        &self,
        job_id: i64,
        worker_id: &str,
        workers: &mut HashMap<String, Worker>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Job>> {
        match self.repos.workers.find_by_id(worker_id).await? {
            Some(worker) => {
                workers.insert(worker_id.to_string(), worker);
            }
            None => {
                workers.remove(worker_id);
            }
        }
        Ok(self
            .repos
            .jobs
            .find_by_id(job_id)
            .await?
            .filter(|job| job.is_dispatchable(now)))
    }

    async fn record_starvation(&self, unmatched: &HashSet<i64>, report: &mut DispatchReport) {
        let threshold = self.config.starvation_warn_ticks.max(1);
        let mut starvation = self.starvation.lock().await;
        starvation.retain(|job_id, _| unmatched.contains(job_id));

        for job_id in unmatched {
            let ticks = starvation.entry(*job_id).or_insert(0);
            *ticks += 1;
            if *ticks == threshold {
                warn!("任务 {} 已连续 {} 轮找不到可用Worker", job_id, ticks);
            }
        }

        report.starved = starvation.values().filter(|t| **t >= threshold).count();
        metrics::gauge!("scheduler_jobs_starved").set(report.starved as f64);
    }

    /// 按固定间隔派发，收到关闭信号后退出
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "启动派发循环, 间隔 {} 秒, 策略 {}",
            self.config.dispatch_interval_seconds,
            self.strategy_name()
        );
        let mut interval = tokio::time::interval(self.config.dispatch_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_tick(Utc::now()).await {
                        error!("派发循环出错: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出派发循环");
                    break;
                }
            }
        }
    }
}
