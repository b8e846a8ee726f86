use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use scheduler_errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};

use crate::calendar::DEFAULT_CALENDAR_KEY;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "RETRYING")]
    Retrying,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Assigned,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Retrying,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Assigned => "ASSIGNED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// 等待派发的状态
    pub fn is_queued(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }

    /// 占用Worker槽位的状态
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Assigned | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Cancelled)
                | (Retrying, Assigned)
                | (Retrying, Cancelled)
                | (Assigned, Running)
                | (Assigned, Pending)
                | (Running, Pending)
                | (Assigned, Succeeded)
                | (Running, Succeeded)
                | (Assigned, Retrying)
                | (Running, Retrying)
                | (Assigned, Failed)
                | (Running, Failed)
                | (Assigned, Cancelled)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| SchedulerError::validation_error(format!("Invalid job status: {s}")))
    }
}

/// 生产方提交的任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub tenant_id: String,
    pub queue: String,
    pub job_key: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub calendar_key: Option<String>,
}

impl JobSubmission {
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(SchedulerError::validation_error("job.tenant_id 不能为空"));
        }
        if self.queue.trim().is_empty() {
            return Err(SchedulerError::validation_error("job.queue 不能为空"));
        }
        if self.job_key.trim().is_empty() {
            return Err(SchedulerError::validation_error("job.job_key 不能为空"));
        }
        if self.max_attempts == Some(0) {
            return Err(SchedulerError::validation_error("job.max_attempts 至少为1"));
        }
        Ok(())
    }

    pub fn calendar_key(&self) -> &str {
        self.calendar_key.as_deref().unwrap_or(DEFAULT_CALENDAR_KEY)
    }
}

/// Worker上报的执行结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failure { error: String },
}

/// 一个待执行的工作单元
///
/// 与 [`crate::Worker`] 一样，状态变化返回新实例，持久化时按 `version` 做条件更新。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub tenant_id: String,
    pub queue: String,
    pub job_key: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub calendar_key: String,
    pub not_before: Option<DateTime<Utc>>,
    pub due_at: DateTime<Utc>,
    pub status: JobStatus,
    pub assigned_worker_id: Option<String>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub cancel_requested: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// 根据提交内容创建待派发任务，`id` 由存储层分配
    pub fn new(
        submission: JobSubmission,
        due_at: DateTime<Utc>,
        default_max_attempts: u32,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Self> {
        submission.validate()?;
        let calendar_key = submission.calendar_key().to_string();
        Ok(Self {
            id: 0,
            tenant_id: submission.tenant_id,
            queue: submission.queue,
            job_key: submission.job_key,
            payload: submission.payload,
            priority: submission.priority,
            calendar_key,
            not_before: submission.not_before,
            due_at,
            status: JobStatus::Pending,
            assigned_worker_id: None,
            attempt: 1,
            max_attempts: submission.max_attempts.unwrap_or(default_max_attempts).max(1),
            last_error: None,
            cancel_requested: false,
            version: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        })
    }

    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        self.status.is_queued() && self.due_at <= now
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// 派发顺序：优先级降序、到期时间升序、id升序
    pub fn dispatch_order(a: &Job, b: &Job) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.due_at.cmp(&b.due_at))
            .then_with(|| a.id.cmp(&b.id))
    }

    fn transition(&self, next: JobStatus, now: DateTime<Utc>) -> SchedulerResult<Job> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::invalid_transition(
                "job",
                self.status.as_str(),
                next.as_str(),
            ));
        }
        Ok(Job {
            status: next,
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn assign(&self, worker_id: &str, now: DateTime<Utc>) -> SchedulerResult<Job> {
        let mut job = self.transition(JobStatus::Assigned, now)?;
        job.assigned_worker_id = Some(worker_id.to_string());
        Ok(job)
    }

    /// 只有当前持有该任务的Worker才能推进它
    pub fn ensure_held_by(&self, worker_id: &str) -> SchedulerResult<()> {
        if self.is_active() && self.assigned_worker_id.as_deref() == Some(worker_id) {
            Ok(())
        } else {
            Err(SchedulerError::StaleClaim {
                worker_id: worker_id.to_string(),
                job_id: self.id,
            })
        }
    }

    pub fn start(&self, worker_id: &str, now: DateTime<Utc>) -> SchedulerResult<Job> {
        self.ensure_held_by(worker_id)?;
        let mut job = self.transition(JobStatus::Running, now)?;
        job.started_at = Some(now);
        Ok(job)
    }

    pub fn succeed(&self, now: DateTime<Utc>) -> SchedulerResult<Job> {
        let mut job = self.transition(JobStatus::Succeeded, now)?;
        job.finished_at = Some(now);
        job.last_error = None;
        Ok(job)
    }

    /// 进入重试：尝试次数加一，释放Worker引用，按新的到期时间重新排队
    pub fn retry(
        &self,
        error: impl Into<String>,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Job> {
        if !self.can_retry() {
            return Err(SchedulerError::invalid_transition(
                "job",
                self.status.as_str(),
                JobStatus::Retrying.as_str(),
            ));
        }
        let mut job = self.transition(JobStatus::Retrying, now)?;
        job.attempt += 1;
        job.last_error = Some(error.into());
        job.assigned_worker_id = None;
        job.started_at = None;
        job.due_at = due_at;
        Ok(job)
    }

    pub fn fail(&self, error: impl Into<String>, now: DateTime<Utc>) -> SchedulerResult<Job> {
        let mut job = self.transition(JobStatus::Failed, now)?;
        job.last_error = Some(error.into());
        job.finished_at = Some(now);
        Ok(job)
    }

    /// Worker失联后把任务放回队列，尝试次数不变；已请求取消的任务直接结束
    pub fn requeue(&self, now: DateTime<Utc>) -> SchedulerResult<Job> {
        if self.cancel_requested {
            return self.finalize_cancel(now);
        }
        let mut job = self.transition(JobStatus::Pending, now)?;
        job.assigned_worker_id = None;
        job.started_at = None;
        Ok(job)
    }

    /// 协作式取消：排队中的任务立即取消，执行中的任务只打标记
    pub fn cancel(&self, now: DateTime<Utc>) -> SchedulerResult<Job> {
        if self.status.is_queued() {
            let mut job = self.transition(JobStatus::Cancelled, now)?;
            job.finished_at = Some(now);
            return Ok(job);
        }
        if self.is_active() {
            return Ok(Job {
                cancel_requested: true,
                updated_at: now,
                ..self.clone()
            });
        }
        Err(SchedulerError::invalid_transition(
            "job",
            self.status.as_str(),
            JobStatus::Cancelled.as_str(),
        ))
    }

    pub fn finalize_cancel(&self, now: DateTime<Utc>) -> SchedulerResult<Job> {
        let mut job = self.transition(JobStatus::Cancelled, now)?;
        job.finished_at = Some(now);
        Ok(job)
    }

    pub fn with_version(&self, version: i64) -> Job {
        Job {
            version,
            ..self.clone()
        }
    }

    pub fn with_id(&self, id: i64) -> Job {
        Job { id, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn submission() -> JobSubmission {
        JobSubmission {
            tenant_id: "acme".to_string(),
            queue: "default".to_string(),
            job_key: "invoice.render".to_string(),
            payload: serde_json::json!({"invoice_id": 42}),
            priority: 5,
            not_before: None,
            max_attempts: Some(2),
            calendar_key: None,
        }
    }

    fn pending(now: DateTime<Utc>) -> Job {
        Job::new(submission(), now, 3, now).unwrap().with_id(7)
    }

    #[test]
    fn test_new_job_defaults() {
        let now = Utc::now();
        let job = pending(now);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.max_attempts, 2);
        assert_eq!(job.calendar_key, DEFAULT_CALENDAR_KEY);
        assert!(job.is_dispatchable(now));
        assert!(!job.is_dispatchable(now - Duration::seconds(1)));

        let mut sub = submission();
        sub.max_attempts = None;
        assert_eq!(Job::new(sub, now, 4, now).unwrap().max_attempts, 4);
    }

    #[test]
    fn test_submission_validation() {
        let now = Utc::now();
        let mut sub = submission();
        sub.queue = " ".to_string();
        assert!(Job::new(sub, now, 3, now).is_err());

        let mut sub = submission();
        sub.max_attempts = Some(0);
        assert!(matches!(
            Job::new(sub, now, 3, now),
            Err(SchedulerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_assign_start_succeed() {
        let now = Utc::now();
        let job = pending(now).assign("w1", now).unwrap();
        assert_eq!(job.status, JobStatus::Assigned);
        assert_eq!(job.assigned_worker_id.as_deref(), Some("w1"));

        let running = job.start("w1", now).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.started_at, Some(now));

        let done = running.succeed(now).unwrap();
        assert!(done.is_terminal());
        assert_eq!(done.finished_at, Some(now));
    }

    #[test]
    fn test_only_holder_can_start() {
        let now = Utc::now();
        let job = pending(now).assign("w1", now).unwrap();
        assert!(matches!(
            job.start("w2", now),
            Err(SchedulerError::StaleClaim { job_id: 7, .. })
        ));
        assert!(pending(now).ensure_held_by("w1").is_err());
    }

    #[test]
    fn test_retry_then_fail() {
        let now = Utc::now();
        let later = now + Duration::hours(1);
        let job = pending(now).assign("w1", now).unwrap();

        let retrying = job.retry("boom", later, now).unwrap();
        assert_eq!(retrying.status, JobStatus::Retrying);
        assert_eq!(retrying.attempt, 2);
        assert_eq!(retrying.due_at, later);
        assert_eq!(retrying.assigned_worker_id, None);
        assert_eq!(retrying.last_error.as_deref(), Some("boom"));
        assert!(!retrying.can_retry());

        let again = retrying.assign("w2", later).unwrap();
        assert!(again.retry("boom", later, later).is_err());
        let failed = again.fail("boom twice", later).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("boom twice"));
        assert_eq!(failed.attempt, 2);
    }

    #[test]
    fn test_requeue_keeps_attempt() {
        let now = Utc::now();
        let running = pending(now)
            .assign("w1", now)
            .unwrap()
            .start("w1", now)
            .unwrap();
        let requeued = running.requeue(now).unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.attempt, running.attempt);
        assert_eq!(requeued.assigned_worker_id, None);
        assert_eq!(requeued.started_at, None);
    }

    #[test]
    fn test_cancel_is_cooperative() {
        let now = Utc::now();
        let cancelled = pending(now).cancel(now).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.cancel(now).is_err());

        let running = pending(now)
            .assign("w1", now)
            .unwrap()
            .start("w1", now)
            .unwrap();
        let flagged = running.cancel(now).unwrap();
        assert_eq!(flagged.status, JobStatus::Running);
        assert!(flagged.cancel_requested);

        assert_eq!(
            flagged.finalize_cancel(now).unwrap().status,
            JobStatus::Cancelled
        );
        assert_eq!(flagged.requeue(now).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_invalid_transitions() {
        let now = Utc::now();
        let job = pending(now);
        assert!(matches!(
            job.succeed(now),
            Err(SchedulerError::InvalidStateTransition { .. })
        ));
        assert!(job.requeue(now).is_err());
        assert!(JobStatus::Succeeded
            .can_transition_to(JobStatus::Pending)
            .eq(&false));
    }

    #[test]
    fn test_dispatch_order() {
        let now = Utc::now();
        let base = pending(now);
        let high = Job {
            priority: 9,
            ..base.with_id(3)
        };
        let early = Job {
            due_at: now - Duration::minutes(5),
            ..base.with_id(2)
        };
        let first = base.with_id(1);

        let mut jobs = vec![first.clone(), early.clone(), high.clone()];
        jobs.sort_by(Job::dispatch_order);
        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_status_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        let outcome: JobOutcome =
            serde_json::from_str(r#"{"outcome":"failure","error":"disk full"}"#).unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Failure {
                error: "disk full".to_string()
            }
        );
    }
}
