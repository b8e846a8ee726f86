//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use chrono::{DateTime, NaiveDate, Utc};
use scheduler_domain::{
    BusinessDays, Calendar, CalendarRecord, CapabilitySet, Job, JobStatus, JobSubmission, Worker,
    WorkerCapabilities, WorkerRecord, WorkerStatus, DEFAULT_CALENDAR_KEY,
};

/// Builder for creating test Job entities
///
/// `id` 默认为0，交给存储层分配。
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            job: Job {
                id: 0,
                tenant_id: "acme".to_string(),
                queue: "default".to_string(),
                job_key: "report.generate".to_string(),
                payload: serde_json::json!({}),
                priority: 0,
                calendar_key: DEFAULT_CALENDAR_KEY.to_string(),
                not_before: None,
                due_at: now,
                status: JobStatus::Pending,
                assigned_worker_id: None,
                attempt: 1,
                max_attempts: 3,
                last_error: None,
                cancel_requested: false,
                version: 0,
                created_at: now,
                updated_at: now,
                started_at: None,
                finished_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.job.id = id;
        self
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.job.tenant_id = tenant_id.to_string();
        self
    }

    pub fn with_queue(mut self, queue: &str) -> Self {
        self.job.queue = queue.to_string();
        self
    }

    pub fn with_job_key(mut self, job_key: &str) -> Self {
        self.job.job_key = job_key.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.job.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.job.priority = priority;
        self
    }

    pub fn with_calendar_key(mut self, calendar_key: &str) -> Self {
        self.job.calendar_key = calendar_key.to_string();
        self
    }

    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.job.due_at = due_at;
        self
    }

    pub fn with_attempts(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.job.attempt = attempt;
        self.job.max_attempts = max_attempts;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn assigned_to(mut self, worker_id: &str) -> Self {
        self.job.status = JobStatus::Assigned;
        self.job.assigned_worker_id = Some(worker_id.to_string());
        self
    }

    pub fn running_on(mut self, worker_id: &str) -> Self {
        self.job.status = JobStatus::Running;
        self.job.assigned_worker_id = Some(worker_id.to_string());
        self.job.started_at = Some(Utc::now());
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for job submissions sent by producers
pub struct SubmissionBuilder {
    submission: JobSubmission,
}

impl SubmissionBuilder {
    pub fn new() -> Self {
        Self {
            submission: JobSubmission {
                tenant_id: "acme".to_string(),
                queue: "default".to_string(),
                job_key: "report.generate".to_string(),
                payload: serde_json::json!({}),
                priority: 0,
                not_before: None,
                max_attempts: None,
                calendar_key: None,
            },
        }
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.submission.tenant_id = tenant_id.to_string();
        self
    }

    pub fn with_queue(mut self, queue: &str) -> Self {
        self.submission.queue = queue.to_string();
        self
    }

    pub fn with_job_key(mut self, job_key: &str) -> Self {
        self.submission.job_key = job_key.to_string();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.submission.priority = priority;
        self
    }

    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.submission.not_before = Some(not_before);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.submission.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_calendar_key(mut self, calendar_key: &str) -> Self {
        self.submission.calendar_key = Some(calendar_key.to_string());
        self
    }

    pub fn build(self) -> JobSubmission {
        self.submission
    }
}

impl Default for SubmissionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Worker entities
pub struct WorkerBuilder {
    record: WorkerRecord,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            record: WorkerRecord {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: None,
                name: "test-worker".to_string(),
                capabilities: WorkerCapabilities::accept_all(),
                heartbeat_at: now,
                status: WorkerStatus::Online,
                max_parallel: 1,
                current_jobs: 0,
                version: 0,
                registered_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.record.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.record.name = name.to_string();
        self
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.record.tenant_id = Some(tenant_id.to_string());
        self
    }

    pub fn with_queues(mut self, queues: &[&str]) -> Self {
        self.record.capabilities.queues = CapabilitySet::only(queues.iter().copied());
        self
    }

    pub fn with_job_keys(mut self, job_keys: &[&str]) -> Self {
        self.record.capabilities.job_keys = CapabilitySet::only(job_keys.iter().copied());
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: u32) -> Self {
        self.record.max_parallel = max_parallel;
        self
    }

    pub fn with_current_jobs(mut self, current_jobs: u32) -> Self {
        self.record.current_jobs = current_jobs;
        self
    }

    pub fn with_heartbeat_at(mut self, heartbeat_at: DateTime<Utc>) -> Self {
        self.record.heartbeat_at = heartbeat_at;
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.record.status = status;
        self
    }

    pub fn offline(self) -> Self {
        self.with_status(WorkerStatus::Offline)
    }

    pub fn busy(mut self) -> Self {
        self.record.current_jobs = self.record.max_parallel;
        self
    }

    pub fn build_record(self) -> WorkerRecord {
        self.record
    }

    pub fn build(self) -> Worker {
        Worker::from_record(self.record).unwrap()
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Calendar entities
pub struct CalendarBuilder {
    record: CalendarRecord,
}

impl CalendarBuilder {
    pub fn new() -> Self {
        Self {
            record: CalendarRecord {
                tenant_id: None,
                key: DEFAULT_CALENDAR_KEY.to_string(),
                name: "test calendar".to_string(),
                holidays: Default::default(),
                business_days: BusinessDays::default(),
                version: 1,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.record.tenant_id = Some(tenant_id.to_string());
        self
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.record.key = key.to_string();
        self
    }

    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.record.holidays.insert(date);
        self
    }

    pub fn with_business_days(mut self, business_days: BusinessDays) -> Self {
        self.record.business_days = business_days;
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.record.version = version;
        self
    }

    pub fn build(self) -> Calendar {
        Calendar::from_record(self.record).unwrap()
    }
}

impl Default for CalendarBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_builder_busy() {
        let worker = WorkerBuilder::new().with_max_parallel(3).busy().build();
        assert_eq!(worker.current_jobs(), 3);
        assert!(!worker.can_accept_job("default", None));
    }

    #[test]
    fn test_job_builder_running() {
        let job = JobBuilder::new().running_on("w1").build();
        assert!(job.ensure_held_by("w1").is_ok());
    }

    #[test]
    fn test_calendar_builder_holiday() {
        let christmas = NaiveDate::from_ymd_opt(2025, 12, 25).unwrap();
        let calendar = CalendarBuilder::new().with_holiday(christmas).build();
        assert!(!calendar.is_working_day(christmas));
    }
}
