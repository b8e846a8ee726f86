use std::sync::Arc;

use chrono::{DateTime, Utc};
use scheduler_config::HealthMonitorConfig;
use scheduler_domain::{ChangeSet, Job, Repositories, Worker, WorkerStatus};
use scheduler_errors::{SchedulerError, SchedulerResult};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::MAX_CONFLICT_RETRIES;

/// 一次巡检的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    /// 被降级为离线的Worker
    pub demoted: Vec<String>,
    pub requeued_jobs: usize,
    pub cleaned_workers: usize,
}

/// Worker健康巡检
///
/// 心跳超时的Worker被标记为离线，槽位清零，其名下 Assigned/Running 的任务
/// 回到队列（尝试次数不变）。三者在同一次条件提交中写入。
pub struct HealthMonitor {
    repos: Repositories,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(repos: Repositories, config: HealthMonitorConfig) -> Self {
        Self { repos, config }
    }

    fn timeout_seconds(&self) -> i64 {
        self.config.heartbeat_timeout_seconds as i64
    }

    fn is_worker_failed(&self, worker: &Worker, now: DateTime<Utc>) -> bool {
        worker.status() != WorkerStatus::Offline && !worker.is_healthy_at(self.timeout_seconds(), now)
    }

    fn should_cleanup_worker(&self, worker: &Worker, now: DateTime<Utc>) -> bool {
        worker.status() == WorkerStatus::Offline
            && worker.current_jobs() == 0
            && (now - worker.heartbeat_at()).num_seconds()
                > self.config.offline_cleanup_threshold_seconds as i64
    }

    /// 执行一次巡检
    pub async fn sweep(&self, now: DateTime<Utc>) -> SchedulerResult<SweepReport> {
        debug!("开始检测失效的Worker");
        let workers = self.repos.workers.find_all().await?;
        let mut report = SweepReport {
            checked: workers.len(),
            ..SweepReport::default()
        };

        for worker in workers.iter().filter(|w| self.is_worker_failed(w, now)) {
            warn!(
                "检测到失效Worker: {} (上次心跳: {})",
                worker.id(),
                worker.heartbeat_at().format("%Y-%m-%d %H:%M:%S UTC")
            );
            match self.take_offline(worker.id(), now, true).await {
                Ok(Some(requeued)) => {
                    report.demoted.push(worker.id().to_string());
                    report.requeued_jobs += requeued;
                }
                Ok(None) => debug!("Worker {} 在处理前已恢复或被移除", worker.id()),
                Err(e) if e.is_fatal() => {
                    error!("处理失效Worker {} 时发现记账错误: {}", worker.id(), e);
                    return Err(e);
                }
                Err(e) => error!("处理失效Worker {} 时出错: {}", worker.id(), e),
            }
        }

        if self.config.auto_cleanup_offline_workers {
            report.cleaned_workers = self.cleanup_offline_workers(now).await?;
        }

        if !report.demoted.is_empty() {
            info!(
                "巡检完成: {} 个Worker降级为离线, {} 个任务重新排队",
                report.demoted.len(),
                report.requeued_jobs
            );
        }
        Ok(report)
    }

    /// 把Worker置为离线并重新排队其名下的任务
    ///
    /// `only_if_stale` 为真时，重新读取后若心跳已恢复或已离线则不做任何修改并返回 `None`。
    /// 成功时返回重新排队（或因已请求取消而直接结束）的任务数。
    pub async fn take_offline(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        only_if_stale: bool,
    ) -> SchedulerResult<Option<usize>> {
        let mut last_conflict = None;
        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some(worker) = self.repos.workers.find_by_id(worker_id).await? else {
                return Ok(None);
            };
            if only_if_stale && !self.is_worker_failed(&worker, now) {
                return Ok(None);
            }

            let stranded = self.repos.jobs.find_active_by_worker(worker_id).await?;
            let requeued: Vec<Job> = stranded
                .iter()
                .map(|job| job.requeue(now))
                .collect::<SchedulerResult<_>>()?;

            let mut changes = ChangeSet::new().with_worker(worker.go_offline().release_all_jobs());
            for job in requeued {
                changes = changes.with_job(job);
            }

            match self.repos.unit_of_work.commit(changes).await {
                Ok(committed) => {
                    let count = committed.jobs.len();
                    if only_if_stale {
                        metrics::counter!("scheduler_workers_demoted_total").increment(1);
                    }
                    metrics::counter!("scheduler_jobs_requeued_total").increment(count as u64);
                    if count > 0 {
                        info!("Worker {} 离线，{} 个任务重新排队", worker_id, count);
                    } else {
                        debug!("Worker {} 离线，名下没有任务", worker_id);
                    }
                    return Ok(Some(count));
                }
                Err(e) if e.is_conflict() => {
                    debug!("Worker {} 离线处理版本冲突，重新读取: {}", worker_id, e);
                    last_conflict = Some(e);
                }
                Err(SchedulerError::WorkerNotFound { .. }) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict
            .unwrap_or_else(|| SchedulerError::version_conflict("worker", worker_id, 0)))
    }

    /// 清理长时间离线且没有任务的Worker
    pub async fn cleanup_offline_workers(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let workers = self.repos.workers.find_all().await?;
        let mut cleaned = 0;

        for worker in workers.iter().filter(|w| self.should_cleanup_worker(w, now)) {
            if !self.repos.jobs.find_active_by_worker(worker.id()).await?.is_empty() {
                continue;
            }
            info!(
                "清理离线Worker: {} (离线时间: {}分钟)",
                worker.id(),
                (now - worker.heartbeat_at()).num_minutes()
            );
            // 以本次读到的版本为条件，其间恢复心跳或接到任务的Worker不会被删除
            match self.repos.workers.unregister(worker.id(), worker.version()).await {
                Ok(true) => cleaned += 1,
                Ok(false) => {}
                Err(e) if e.is_conflict() => {
                    debug!("Worker {} 在清理前被修改，留待下次巡检", worker.id());
                }
                Err(e) => error!("清理离线Worker {} 失败: {}", worker.id(), e),
            }
        }

        if cleaned > 0 {
            info!("清理了 {} 个离线Worker", cleaned);
        }
        Ok(cleaned)
    }

    /// 按固定间隔巡检，收到关闭信号后退出
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "启动Worker健康巡检, 间隔 {} 秒, 心跳超时 {} 秒",
            self.config.sweep_interval_seconds, self.config.heartbeat_timeout_seconds
        );
        let mut interval = tokio::time::interval(self.config.sweep_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!("Worker健康巡检出错: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出Worker健康巡检");
                    break;
                }
            }
        }
    }
}
