use axum::{
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use scheduler_dispatcher::SchedulerService;
use std::sync::Arc;

use crate::handlers::{
    calendars::{
        create_calendar, get_calendar, list_calendar_versions, list_working_days,
        update_business_days, update_holidays,
    },
    health::health_check,
    jobs::{cancel_job, get_job, list_jobs, submit_job},
    metrics::render_metrics,
    workers::{
        claim_result, deregister_worker, get_worker, heartbeat, list_workers, register_worker,
        set_worker_status, start_job,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SchedulerService>,
    /// 未启用指标时为空，`/metrics` 返回404
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self {
            service,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查与指标
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        // 任务
        .route("/api/jobs", get(list_jobs).post(submit_job))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        // Worker
        .route("/api/workers", get(list_workers).post(register_worker))
        .route(
            "/api/workers/{id}",
            get(get_worker).delete(deregister_worker),
        )
        .route("/api/workers/{id}/heartbeat", post(heartbeat))
        .route("/api/workers/{id}/status", post(set_worker_status))
        .route("/api/workers/{id}/jobs/{job_id}/start", post(start_job))
        .route("/api/workers/{id}/jobs/{job_id}/result", post(claim_result))
        // 日历
        .route("/api/calendars", post(create_calendar))
        .route("/api/calendars/{key}", get(get_calendar))
        .route("/api/calendars/{key}/versions", get(list_calendar_versions))
        .route("/api/calendars/{key}/working-days", get(list_working_days))
        .route("/api/calendars/{key}/holidays", put(update_holidays))
        .route(
            "/api/calendars/{key}/business-days",
            put(update_business_days),
        )
        .with_state(state)
}
