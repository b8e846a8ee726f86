use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use scheduler_api::{create_app, create_routes, AppState};
use scheduler_config::{ApiConfig, DispatcherConfig, HealthMonitorConfig, RetryConfig};
use scheduler_dispatcher::SchedulerService;
use scheduler_domain::Repositories;
use scheduler_infrastructure::InMemoryStore;

fn test_service() -> Arc<SchedulerService> {
    let repos = Repositories::from_store(Arc::new(InMemoryStore::new()));
    Arc::new(SchedulerService::new(
        repos,
        DispatcherConfig::default(),
        HealthMonitorConfig::default(),
        RetryConfig::default(),
    ))
}

fn test_app() -> (Arc<SchedulerService>, Router) {
    let service = test_service();
    let app = create_routes(AppState::new(service.clone()));
    (service, app)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register(app: &Router, name: &str, max_parallel: u32) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/workers",
        Some(json!({
            "name": name,
            "capabilities": { "queues": "any", "job_keys": "any" },
            "max_parallel": max_parallel
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn submit(app: &Router) -> i64 {
    let (status, body) = send(
        app,
        "POST",
        "/api/jobs",
        Some(json!({
            "tenant_id": "acme",
            "queue": "reports",
            "job_key": "monthly-close"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["due_at"].is_string());
    body["data"]["id"].as_i64().unwrap()
}

async fn dispatch(service: &SchedulerService) {
    // 标准日历下到期时间最多推迟到下一个周一
    service
        .dispatcher()
        .dispatch_tick(Utc::now() + Duration::days(7))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health_check() {
    let app = create_app(AppState::new(test_service()), &ApiConfig::default());

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_metrics_disabled_returns_not_found() {
    let (_, app) = test_app();

    let (status, body) = send(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_submit_and_query_job() {
    let (_, app) = test_app();
    let id = submit(&app).await;

    let (status, body) = send(&app, "GET", &format!("/api/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "PENDING");
    assert_eq!(body["data"]["attempt"], 1);
    assert_eq!(body["data"]["calendar_key"], "default");

    let (status, body) = send(&app, "GET", "/api/jobs?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);

    let (status, body) = send(&app, "GET", "/api/jobs?status=RUNNING", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 0);
}

#[tokio::test]
async fn test_job_errors() {
    let (_, app) = test_app();

    let (status, body) = send(&app, "GET", "/api/jobs/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_type"], "JOB_NOT_FOUND");

    let (status, _) = send(&app, "GET", "/api/jobs?status=sleeping", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/jobs?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        "/api/jobs",
        Some(json!({ "tenant_id": "acme", "queue": " ", "job_key": "k" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_worker_executes_job() {
    let (service, app) = test_app();
    let worker_id = register(&app, "worker-1", 2).await;
    let job_id = submit(&app).await;
    dispatch(&service).await;

    let (_, body) = send(&app, "GET", &format!("/api/jobs/{job_id}"), None).await;
    assert_eq!(body["data"]["status"], "ASSIGNED");
    assert_eq!(body["data"]["assigned_worker_id"], worker_id.as_str());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/workers/{worker_id}/jobs/{job_id}/start"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "RUNNING");

    // 其他Worker上报的结果被拒绝
    let intruder = register(&app, "worker-2", 1).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/workers/{intruder}/jobs/{job_id}/result"),
        Some(json!({ "outcome": "success" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_type"], "STALE_CLAIM");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/workers/{worker_id}/jobs/{job_id}/result"),
        Some(json!({ "outcome": "success" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "SUCCEEDED");

    let (_, body) = send(&app, "GET", &format!("/api/workers/{worker_id}"), None).await;
    assert_eq!(body["data"]["current_jobs"], 0);

    // 终态任务不能再次上报
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/workers/{worker_id}/jobs/{job_id}/result"),
        Some(json!({ "outcome": "failure", "error": "late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_failure_moves_job_to_retrying() {
    let (service, app) = test_app();
    let worker_id = register(&app, "worker-1", 1).await;
    let job_id = submit(&app).await;
    dispatch(&service).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/workers/{worker_id}/jobs/{job_id}/result"),
        Some(json!({ "outcome": "failure", "error": "ledger locked" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "RETRYING");
    assert_eq!(body["data"]["attempt"], 2);
    assert_eq!(body["data"]["last_error"], "ledger locked");
}

#[tokio::test]
async fn test_cooperative_cancel() {
    let (service, app) = test_app();
    let worker_id = register(&app, "worker-1", 1).await;
    let job_id = submit(&app).await;
    dispatch(&service).await;

    let (status, body) = send(&app, "POST", &format!("/api/jobs/{job_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ASSIGNED");
    assert_eq!(body["data"]["cancel_requested"], true);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/workers/{worker_id}/heartbeat"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["acknowledged"], true);
    assert_eq!(body["data"]["cancel_requested_job_ids"], json!([job_id]));

    let (_, body) = send(
        &app,
        "POST",
        &format!("/api/workers/{worker_id}/jobs/{job_id}/result"),
        Some(json!({ "outcome": "success" })),
    )
    .await;
    assert_eq!(body["data"]["status"], "CANCELLED");

    // 排队中的任务立即取消
    let queued = submit(&app).await;
    let (_, body) = send(&app, "POST", &format!("/api/jobs/{queued}/cancel"), None).await;
    assert_eq!(body["data"]["status"], "CANCELLED");
}

#[tokio::test]
async fn test_worker_administration() {
    let (service, app) = test_app();
    let worker_id = register(&app, "worker-1", 1).await;
    let job_id = submit(&app).await;
    dispatch(&service).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/workers/{worker_id}/status"),
        Some(json!({ "status": "maintenance" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "MAINTENANCE");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/workers/{worker_id}/status"),
        Some(json!({ "status": "sleeping" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", "/api/workers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 1);

    let (status, _) = send(&app, "DELETE", &format!("/api/workers/{worker_id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", &format!("/api/workers/{worker_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_type"], "WORKER_NOT_FOUND");

    // 注销前名下的任务回到队列，尝试次数不变
    let (_, body) = send(&app, "GET", &format!("/api/jobs/{job_id}"), None).await;
    assert_eq!(body["data"]["status"], "PENDING");
    assert_eq!(body["data"]["attempt"], 1);
    assert!(body["data"]["assigned_worker_id"].is_null());

    let (status, _) = send(&app, "POST", "/api/workers/ghost/heartbeat", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_register_with_empty_capability_set_is_rejected() {
    let (_, app) = test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/workers",
        Some(json!({
            "name": "picky",
            "capabilities": { "queues": { "only": [] }, "job_keys": "any" },
            "max_parallel": 1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_calendar_versions() {
    let (_, app) = test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/api/calendars",
        Some(json!({
            "tenant_id": "acme",
            "key": "payroll",
            "name": "Payroll",
            "holidays": ["2025-12-25"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["version"], 1);

    let (status, body) = send(
        &app,
        "GET",
        "/api/calendars/payroll/working-days?tenant_id=acme&start=2025-12-22&end=2025-12-28",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["working_days"],
        json!(["2025-12-22", "2025-12-23", "2025-12-24", "2025-12-26"])
    );

    let (status, body) = send(
        &app,
        "PUT",
        "/api/calendars/payroll/holidays",
        Some(json!({ "tenant_id": "acme", "holidays": ["2025-12-24", "2025-12-25"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], 2);

    let (_, body) = send(&app, "GET", "/api/calendars/payroll?tenant_id=acme", None).await;
    assert_eq!(body["data"]["version"], 2);
    assert_eq!(body["data"]["holidays"], json!(["2025-12-24", "2025-12-25"]));

    let (_, body) = send(
        &app,
        "GET",
        "/api/calendars/payroll?tenant_id=acme&version=1",
        None,
    )
    .await;
    assert_eq!(body["data"]["holidays"], json!(["2025-12-25"]));

    let (_, body) = send(&app, "GET", "/api/calendars/payroll/versions?tenant_id=acme", None).await;
    assert_eq!(body["data"]["count"], 2);

    let (status, body) = send(
        &app,
        "PUT",
        "/api/calendars/payroll/business-days",
        Some(json!({
            "tenant_id": "acme",
            "business_days": {
                "monday": false, "tuesday": false, "wednesday": false, "thursday": false,
                "friday": false, "saturday": false, "sunday": false
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "CONFIGURATION_ERROR");

    let (status, body) = send(&app, "GET", "/api/calendars/payroll", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_type"], "CALENDAR_NOT_FOUND");
}
