//! # Scheduler API
//!
//! 工作日历调度器的REST接口，基于Axum构建。
//!
//! ## API 端点
//!
//! ### 任务
//! - `POST /api/jobs` - 提交任务，返回 `{id, due_at}`
//! - `GET /api/jobs?status=&limit=` - 按状态查询任务
//! - `GET /api/jobs/{id}` - 获取任务详情
//! - `POST /api/jobs/{id}/cancel` - 取消任务（执行中的任务为协作式取消）
//!
//! ### Worker
//! - `POST /api/workers` - 注册Worker
//! - `GET /api/workers` / `GET /api/workers/{id}` - 查询Worker
//! - `DELETE /api/workers/{id}` - 注销Worker，名下任务重新排队
//! - `POST /api/workers/{id}/heartbeat` - 心跳，返回需要停止的任务
//! - `POST /api/workers/{id}/status` - 运维状态切换
//! - `POST /api/workers/{id}/jobs/{job_id}/start` - 确认开始执行
//! - `POST /api/workers/{id}/jobs/{job_id}/result` - 上报执行结果
//!
//! ### 日历
//! - `POST /api/calendars` - 创建日历
//! - `GET /api/calendars/{key}?tenant_id=&version=` - 获取日历
//! - `GET /api/calendars/{key}/versions` - 列出全部版本
//! - `GET /api/calendars/{key}/working-days?start=&end=` - 区间内的工作日
//! - `PUT /api/calendars/{key}/holidays` - 替换节假日，发布新版本
//! - `PUT /api/calendars/{key}/business-days` - 替换工作日配置，发布新版本
//!
//! ### 运维
//! - `GET /health` - 健康检查
//! - `GET /metrics` - Prometheus指标（启用时）
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "success": true,
//!   "data": { "id": 1, "due_at": "2025-12-22T09:00:00Z" },
//!   "message": null,
//!   "timestamp": "2025-12-22T09:00:00Z"
//! }
//! ```
//!
//! 错误时 `success` 为 `false`，`message` 给出原因，`error_type` 给出分类：
//! 资源不存在返回404，版本冲突与过期上报返回409，参数或配置错误返回400，
//! 容量记账异常等内部错误返回500。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use scheduler_config::ApiConfig;
use tower::ServiceBuilder;

pub use error::{ApiError, ApiResult};
pub use response::{ApiResponse, ListResponse};
pub use routes::{create_routes, AppState};

use crate::middleware::{cors_layer, request_logging, timeout_layer, trace_layer};

/// 创建带有中间件的完整应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let mut app = create_routes(state);
    if api_config.cors_enabled {
        app = app.layer(cors_layer());
    }

    app.layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(timeout_layer(api_config.request_timeout_seconds))
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
