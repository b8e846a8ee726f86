use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scheduler_errors::SchedulerError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Scheduler(err) => scheduler_status(err),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Scheduler(err) => match err {
                SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
                SchedulerError::WorkerNotFound { .. } => "WORKER_NOT_FOUND",
                SchedulerError::CalendarNotFound { .. } => "CALENDAR_NOT_FOUND",
                SchedulerError::VersionConflict { .. } => "VERSION_CONFLICT",
                SchedulerError::StaleClaim { .. } => "STALE_CLAIM",
                SchedulerError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
                SchedulerError::ValidationError(_) => "VALIDATION_ERROR",
                SchedulerError::Configuration(_) => "CONFIGURATION_ERROR",
                SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
                SchedulerError::Timeout(_) => "TIMEOUT",
                _ => "INTERNAL_ERROR",
            },
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound => "NOT_FOUND",
        }
    }
}

fn scheduler_status(err: &SchedulerError) -> StatusCode {
    match err {
        SchedulerError::JobNotFound { .. }
        | SchedulerError::WorkerNotFound { .. }
        | SchedulerError::CalendarNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::VersionConflict { .. }
        | SchedulerError::StaleClaim { .. }
        | SchedulerError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        SchedulerError::ValidationError(_)
        | SchedulerError::Configuration(_)
        | SchedulerError::Serialization(_) => StatusCode::BAD_REQUEST,
        SchedulerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // 内部错误不向调用方暴露细节
            ApiError::Scheduler(err) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!("请求处理失败: {}", err);
                err.user_message().to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "data": null,
            "message": message,
            "error_type": self.error_type(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
