use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scheduler_api::{create_routes, AppState};
use scheduler_client::{local_worker_name, ClientConfig, DispatcherClient, HeartbeatManager};
use scheduler_config::{DispatcherConfig, HealthMonitorConfig, RetryConfig};
use scheduler_dispatcher::SchedulerService;
use scheduler_domain::{
    JobOutcome, JobStatus, JobSubmission, Repositories, WorkerCapabilities, WorkerRegistration,
};
use scheduler_errors::SchedulerError;
use scheduler_infrastructure::InMemoryStore;
use tokio::sync::{broadcast, mpsc};

async fn spawn_server() -> (Arc<SchedulerService>, String) {
    let repos = Repositories::from_store(Arc::new(InMemoryStore::new()));
    let service = Arc::new(SchedulerService::new(
        repos,
        DispatcherConfig::default(),
        HealthMonitorConfig::default(),
        RetryConfig::default(),
    ));
    let app = create_routes(AppState::new(service.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (service, format!("http://{addr}"))
}

fn client(base_url: &str) -> Arc<DispatcherClient> {
    let config = ClientConfig {
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        ..ClientConfig::new(base_url)
    };
    Arc::new(DispatcherClient::new(config).unwrap())
}

fn registration(max_parallel: u32) -> WorkerRegistration {
    WorkerRegistration {
        tenant_id: None,
        name: local_worker_name(),
        capabilities: WorkerCapabilities::accept_all(),
        max_parallel,
    }
}

fn submission() -> JobSubmission {
    JobSubmission {
        tenant_id: "acme".to_string(),
        queue: "invoices".to_string(),
        job_key: "send-reminders".to_string(),
        payload: serde_json::json!({ "batch": 42 }),
        priority: 0,
        not_before: None,
        max_attempts: None,
        calendar_key: None,
    }
}

async fn dispatch(service: &SchedulerService) {
    service
        .dispatcher()
        .dispatch_tick(Utc::now() + chrono::Duration::days(7))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_worker_round_trip() {
    let (service, base_url) = spawn_server().await;
    let client = client(&base_url);

    let worker = client.register(&registration(1)).await.unwrap();
    let submitted = client.submit_job(&submission()).await.unwrap();
    assert!(submitted.id > 0);
    dispatch(&service).await;

    let ack = client.heartbeat(worker.id()).await.unwrap();
    assert!(ack.acknowledged);
    assert!(ack.cancel_requested_job_ids.is_empty());

    let running = client.start_job(worker.id(), submitted.id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);

    let done = client
        .report_result(worker.id(), submitted.id, &JobOutcome::Success)
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);

    let fetched = client.get_job(submitted.id).await.unwrap();
    assert_eq!(fetched.status, JobStatus::Succeeded);

    client.unregister(worker.id()).await.unwrap();
    let err = client.heartbeat(worker.id()).await.unwrap_err();
    assert!(matches!(err, SchedulerError::WorkerNotFound { ref id } if id == worker.id()));
}

#[tokio::test]
async fn test_report_from_wrong_worker_is_stale_claim() {
    let (service, base_url) = spawn_server().await;
    let client = client(&base_url);

    let owner = client.register(&registration(1)).await.unwrap();
    let submitted = client.submit_job(&submission()).await.unwrap();
    dispatch(&service).await;
    let other = client.register(&registration(1)).await.unwrap();

    let err = client
        .report_result(
            other.id(),
            submitted.id,
            &JobOutcome::Failure {
                error: "not mine".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::StaleClaim { ref worker_id, job_id } if worker_id == other.id() && job_id == submitted.id
    ));

    let job = client.get_job(submitted.id).await.unwrap();
    assert_eq!(job.assigned_worker_id.as_deref(), Some(owner.id()));

    let err = client.get_job(9_999).await.unwrap_err();
    assert!(matches!(err, SchedulerError::JobNotFound { id: 9_999 }));
}

#[tokio::test]
async fn test_unreachable_server_gives_up_after_retries() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig {
        max_retries: 2,
        initial_backoff_ms: 5,
        max_backoff_ms: 10,
        connect_timeout_ms: 500,
        request_timeout_ms: 1_000,
        ..ClientConfig::new(format!("http://{addr}"))
    };
    let client = DispatcherClient::new(config).unwrap();

    let err = client.heartbeat("any-worker").await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_heartbeat_manager_forwards_cancel_requests() {
    let (service, base_url) = spawn_server().await;
    let client = client(&base_url);

    let worker = client.register(&registration(1)).await.unwrap();
    let submitted = client.submit_job(&submission()).await.unwrap();
    dispatch(&service).await;
    client.start_job(worker.id(), submitted.id).await.unwrap();

    let flagged = client.cancel_job(submitted.id).await.unwrap();
    assert!(flagged.cancel_requested);
    assert_eq!(flagged.status, JobStatus::Running);

    let (cancel_tx, mut cancel_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = HeartbeatManager::new(worker.id(), client.clone())
        .with_interval(Duration::from_millis(50))
        .with_cancel_listener(cancel_tx)
        .start(shutdown_rx);

    let cancelled = tokio::time::timeout(Duration::from_secs(5), cancel_rx.recv())
        .await
        .unwrap();
    assert_eq!(cancelled, Some(submitted.id));

    let done = client
        .report_result(worker.id(), submitted.id, &JobOutcome::Success)
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Cancelled);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
