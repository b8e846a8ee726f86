use chrono::{DateTime, Utc};
use scheduler_domain::{ChangeSet, Job, JobOutcome, JobStatus, Repositories};
use scheduler_errors::{SchedulerError, SchedulerResult};
use tracing::{debug, error, info, warn};

use crate::calendar_resolver::CalendarResolver;
use crate::retry_policy::RetryPolicy;
use crate::MAX_CONFLICT_RETRIES;

/// 处理Worker上报的开始执行与执行结果
pub struct CompletionHandler {
    repos: Repositories,
    resolver: CalendarResolver,
    retry_policy: RetryPolicy,
}

impl CompletionHandler {
    pub fn new(repos: Repositories, retry_policy: RetryPolicy) -> Self {
        let resolver = CalendarResolver::new(repos.calendars.clone());
        Self {
            repos,
            resolver,
            retry_policy,
        }
    }

    async fn load_job(&self, job_id: i64) -> SchedulerResult<Job> {
        self.repos
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| SchedulerError::job_not_found(job_id))
    }

    /// Worker确认开始执行：Assigned -> Running
    pub async fn start_job(
        &self,
        worker_id: &str,
        job_id: i64,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Job> {
        let mut last_conflict = None;
        for _ in 0..MAX_CONFLICT_RETRIES {
            let job = self.load_job(job_id).await?;
            if job.status == JobStatus::Running {
                job.ensure_held_by(worker_id)?;
                return Ok(job);
            }
            let started = job.start(worker_id, now)?;
            match self.repos.jobs.update(&started).await {
                Ok(updated) => {
                    debug!("Worker {} 开始执行任务 {}", worker_id, job_id);
                    return Ok(updated);
                }
                Err(e) if e.is_conflict() => last_conflict = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or_else(|| SchedulerError::version_conflict("job", job_id, 0)))
    }

    /// 处理执行结果：成功、进入重试或最终失败；已请求取消的任务以取消结束。
    /// 任务与Worker的槽位释放在同一次提交中完成。
    pub async fn claim_result(
        &self,
        worker_id: &str,
        job_id: i64,
        outcome: JobOutcome,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Job> {
        let mut last_conflict = None;
        for _ in 0..MAX_CONFLICT_RETRIES {
            let job = self.load_job(job_id).await?;
            job.ensure_held_by(worker_id)?;

            let worker = self
                .repos
                .workers
                .find_by_id(worker_id)
                .await?
                .ok_or_else(|| SchedulerError::worker_not_found(worker_id))?;

            let finished = self.finish(&job, &outcome, now).await?;
            let released = match worker.finish_job() {
                Ok(released) => released,
                Err(e) => {
                    error!("Worker {} 槽位记账异常: {}", worker_id, e);
                    return Err(e);
                }
            };

            let changes = ChangeSet::new().with_worker(released).with_job(finished);
            match self.repos.unit_of_work.commit(changes).await {
                Ok(mut committed) => {
                    let Some(job) = committed.jobs.pop() else {
                        return Err(SchedulerError::Internal(format!(
                            "提交任务 {job_id} 结果后没有返回任务记录"
                        )));
                    };
                    let label = outcome_label(job.status);
                    metrics::counter!("scheduler_jobs_completed_total", "outcome" => label)
                        .increment(1);
                    info!(
                        "任务 {} 在Worker {} 上的第 {} 次尝试结束: {}",
                        job_id, worker_id, job.attempt, job.status
                    );
                    return Ok(job);
                }
                Err(e) if e.is_conflict() => {
                    debug!("提交任务 {} 结果时版本冲突，重新读取: {}", job_id, e);
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        warn!("任务 {} 结果提交多次冲突，放弃", job_id);
        Err(last_conflict.unwrap_or_else(|| SchedulerError::version_conflict("job", job_id, 0)))
    }

    async fn finish(
        &self,
        job: &Job,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Job> {
        if job.cancel_requested {
            return job.finalize_cancel(now);
        }
        match outcome {
            JobOutcome::Success => job.succeed(now),
            JobOutcome::Failure { error } if job.can_retry() => {
                let calendar = self.resolver.resolve(&job.tenant_id, &job.calendar_key).await?;
                let retry_at = self.retry_policy.retry_at(&calendar, job.attempt, now)?;
                job.retry(error.clone(), retry_at, now)
            }
            JobOutcome::Failure { error } => {
                warn!(
                    "任务 {} 已用尽 {} 次尝试，标记为失败: {}",
                    job.id, job.max_attempts, error
                );
                job.fail(error.clone(), now)
            }
        }
    }
}

fn outcome_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Succeeded => "succeeded",
        JobStatus::Retrying => "retrying",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
        _ => "other",
    }
}
