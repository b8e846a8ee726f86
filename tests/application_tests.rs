use std::sync::Arc;
use std::time::Duration;

use scheduler_client::{ClientConfig, DispatcherClient};
use scheduler_config::{AppConfig, StorageBackend};
use scheduler_dispatcher::CalendarDefinition;
use scheduler_domain::{
    BusinessDays, JobStatus, JobSubmission, WorkerCapabilities, WorkerRegistration,
};
use scheduler_testing_utils::TestEnv;
use workday_scheduler::{build_repositories, Application, ShutdownManager};

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.api.bind_address = "127.0.0.1:0".to_string();
    config.dispatcher.dispatch_interval_seconds = 1;
    config.observability.metrics_enabled = false;
    config
}

fn submission() -> JobSubmission {
    JobSubmission {
        tenant_id: "acme".to_string(),
        queue: "payroll".to_string(),
        job_key: "run-payroll".to_string(),
        payload: serde_json::Value::Null,
        priority: 5,
        not_before: None,
        max_attempts: None,
        calendar_key: None,
    }
}

/// 每天都是工作日的全局日历，测试结果不受运行当天影响
fn every_day_calendar() -> CalendarDefinition {
    CalendarDefinition {
        tenant_id: None,
        key: "default".to_string(),
        name: "all week".to_string(),
        holidays: Vec::new(),
        business_days: Some(BusinessDays::every_day()),
    }
}

#[tokio::test]
async fn test_application_dispatches_and_shuts_down() {
    let app = Application::new(test_config()).await.unwrap();
    app.service()
        .create_calendar(every_day_calendar())
        .await
        .unwrap();

    let listener = app.bind().await.unwrap();
    let address = listener.local_addr().unwrap();

    let shutdown = ShutdownManager::with_grace_period(Duration::from_secs(5));
    let shutdown_rx = shutdown.subscribe();
    let app = Arc::new(app);
    let running = Arc::clone(&app);
    let handle =
        tokio::spawn(async move { running.run_with_listener(Some(listener), shutdown_rx).await });

    let client = Arc::new(DispatcherClient::new(ClientConfig::new(format!("http://{address}"))).unwrap());
    let worker = client
        .register(&WorkerRegistration {
            tenant_id: None,
            name: "payroll-runner".to_string(),
            capabilities: WorkerCapabilities::accept_all(),
            max_parallel: 2,
        })
        .await
        .unwrap();
    let submitted = client.submit_job(&submission()).await.unwrap();

    let poll = Arc::clone(&client);
    let assigned = TestEnv::wait_for(
        || {
            let client = Arc::clone(&poll);
            async move {
                client
                    .get_job(submitted.id)
                    .await
                    .map(|job| job.status == JobStatus::Assigned)
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(assigned, "job was never dispatched");

    let job = client.get_job(submitted.id).await.unwrap();
    assert_eq!(job.assigned_worker_id.as_deref(), Some(worker.id()));

    shutdown.shutdown();
    assert!(shutdown.wait_with_grace(handle).await);
}

#[tokio::test]
async fn test_sqlite_backend_persists_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scheduler.db");

    let mut config = test_config();
    config.storage.backend = StorageBackend::Sqlite;
    config.database.url = format!("sqlite://{}?mode=rwc", path.display());
    config.database.max_connections = 1;

    let first = Application::new(config.clone()).await.unwrap();
    let job = first
        .service()
        .submit_job(submission(), chrono::Utc::now())
        .await
        .unwrap();
    drop(first);

    let repos = build_repositories(&config).await.unwrap();
    let reloaded = repos.jobs.find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.job_key, "run-payroll");
    assert_eq!(reloaded.status, JobStatus::Pending);
    assert_eq!(
        reloaded.due_at.timestamp_millis(),
        job.due_at.timestamp_millis()
    );
}
