use thiserror::Error;


#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    JobNotFound { id: i64 },
    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },
    #[error("日历未找到: {key}")]
    CalendarNotFound { key: String },
    #[error("版本冲突: {entity} {id} 期望版本 {expected}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },
    #[error("无效的状态转换: {entity} {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("容量记账不一致: {0}")]
    CapacityViolation(String),
    #[error("过期的任务结果上报: Worker {worker_id} 不再持有任务 {job_id}")]
    StaleClaim { worker_id: String, job_id: i64 },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn job_not_found(id: i64) -> Self {
        Self::JobNotFound { id }
    }
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }
    pub fn calendar_not_found<S: Into<String>>(key: S) -> Self {
        Self::CalendarNotFound { key: key.into() }
    }
    pub fn version_conflict<S: ToString>(entity: &'static str, id: S, expected: i64) -> Self {
        Self::VersionConflict {
            entity,
            id: id.to_string(),
            expected,
        }
    }
    pub fn invalid_transition<F: ToString, T: ToString>(
        entity: &'static str,
        from: F,
        to: T,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn capacity_violation<S: Into<String>>(msg: S) -> Self {
        Self::CapacityViolation(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    /// 致命错误说明调度器自身的记账出现缺陷，需要运维介入
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::Internal(_)
                | SchedulerError::Configuration(_)
                | SchedulerError::CapacityViolation(_)
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::VersionConflict { .. }
                | SchedulerError::DatabaseOperation(_)
                | SchedulerError::Network(_)
                | SchedulerError::Timeout(_)
        )
    }
    pub fn is_conflict(&self) -> bool {
        matches!(self, SchedulerError::VersionConflict { .. })
    }
    pub fn user_message(&self) -> &str {
        match self {
            SchedulerError::JobNotFound { .. } => "请求的任务不存在",
            SchedulerError::WorkerNotFound { .. } => "请求的Worker节点不存在",
            SchedulerError::CalendarNotFound { .. } => "请求的日历不存在",
            SchedulerError::VersionConflict { .. } => "数据已被并发修改，请重新读取后重试",
            SchedulerError::StaleClaim { .. } => "该任务已不再分配给此Worker",
            SchedulerError::ValidationError(_) => "输入数据验证失败",
            SchedulerError::Configuration(_) => "配置有误",
            SchedulerError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}
