use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use scheduler_domain::{JobOutcome, WorkerRegistration, WorkerStatus};
use serde::Deserialize;

use crate::{
    error::ApiResult,
    response::{created, success, ApiResponse, ListResponse},
    routes::AppState,
};

/// 运维状态切换请求，状态名不区分大小写
#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: String,
}

/// 注册Worker
pub async fn register_worker(
    State(state): State<AppState>,
    Json(registration): Json<WorkerRegistration>,
) -> ApiResult<impl IntoResponse> {
    let worker = state
        .service
        .register_worker(registration, Utc::now())
        .await?;
    Ok(created(worker))
}

/// 获取Worker列表
pub async fn list_workers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let workers = state.service.list_workers().await?;
    Ok(success(ListResponse::new(workers)))
}

/// 获取单个Worker信息
pub async fn get_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let worker = state.service.get_worker(&id).await?;
    Ok(success(worker))
}

/// 注销Worker
pub async fn deregister_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.service.deregister_worker(&id, Utc::now()).await?;
    Ok(ApiResponse::success_empty_with_message(format!(
        "Worker {id} 已注销"
    )))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let ack = state.service.heartbeat(&id, Utc::now()).await?;
    Ok(success(ack))
}

pub async fn set_worker_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StatusChangeRequest>,
) -> ApiResult<impl IntoResponse> {
    let status: WorkerStatus = request.status.parse()?;
    let worker = state
        .service
        .set_worker_status(&id, status, Utc::now())
        .await?;
    Ok(success(worker))
}

/// Worker确认开始执行任务
pub async fn start_job(
    State(state): State<AppState>,
    Path((id, job_id)): Path<(String, i64)>,
) -> ApiResult<impl IntoResponse> {
    let job = state.service.start_job(&id, job_id, Utc::now()).await?;
    Ok(success(job))
}

/// Worker上报执行结果
pub async fn claim_result(
    State(state): State<AppState>,
    Path((id, job_id)): Path<(String, i64)>,
    Json(outcome): Json<JobOutcome>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .service
        .claim_result(&id, job_id, outcome, Utc::now())
        .await?;
    Ok(success(job))
}
