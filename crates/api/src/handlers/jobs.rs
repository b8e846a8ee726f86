use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use scheduler_domain::{JobStatus, JobSubmission};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, ListResponse},
    routes::AppState,
};

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct JobQueryParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// 提交成功后返回给生产方的内容
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub id: i64,
    pub due_at: DateTime<Utc>,
}

/// 提交任务
pub async fn submit_job(
    State(state): State<AppState>,
    Json(submission): Json<JobSubmission>,
) -> ApiResult<impl IntoResponse> {
    let job = state.service.submit_job(submission, Utc::now()).await?;
    Ok(created(SubmittedJob {
        id: job.id,
        due_at: job.due_at,
    }))
}

/// 获取任务列表
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()?;
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit 必须在 1 到 {MAX_LIST_LIMIT} 之间"
        )));
    }

    let jobs = state.service.list_jobs(status, limit).await?;
    Ok(success(ListResponse::new(jobs)))
}

/// 获取单个任务
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let job = state.service.get_job(id).await?;
    Ok(success(job))
}

/// 取消任务，执行中的任务只标记为待取消
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let job = state.service.cancel_job(id, Utc::now()).await?;
    Ok(success(job))
}
