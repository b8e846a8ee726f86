use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use scheduler_domain::{Job, JobOutcome, JobSubmission, Worker, WorkerRegistration};
use scheduler_dispatcher::HeartbeatAck;
use scheduler_errors::{SchedulerError, SchedulerResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;

/// 服务端统一响应格式
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

/// 提交任务后服务端返回的内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub id: i64,
    pub due_at: DateTime<Utc>,
}

/// 用于把服务端错误还原成带上下文的 [`SchedulerError`]
#[derive(Debug, Clone, Copy, Default)]
struct RequestTarget<'a> {
    worker_id: Option<&'a str>,
    job_id: Option<i64>,
}

/// 调度服务的HTTP客户端
///
/// 每次请求都有超时；网络错误、超时与服务端版本冲突按指数退避重试，
/// 其余错误直接返回给调用方。
pub struct DispatcherClient {
    config: ClientConfig,
    http_client: reqwest::Client,
}

impl DispatcherClient {
    pub fn new(config: ClientConfig) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| SchedulerError::config_error(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn register(&self, registration: &WorkerRegistration) -> SchedulerResult<Worker> {
        let worker: Worker = self
            .request_data(
                Method::POST,
                "/api/workers",
                Some(registration),
                RequestTarget::default(),
            )
            .await?;
        info!("Worker {} 注册成功: {}", registration.name, worker.id());
        Ok(worker)
    }

    pub async fn unregister(&self, worker_id: &str) -> SchedulerResult<()> {
        let target = RequestTarget {
            worker_id: Some(worker_id),
            job_id: None,
        };
        self.request::<(), serde_json::Value>(
            Method::DELETE,
            &format!("/api/workers/{worker_id}"),
            None,
            target,
        )
        .await?;
        info!("Worker {} 已从调度服务注销", worker_id);
        Ok(())
    }

    pub async fn heartbeat(&self, worker_id: &str) -> SchedulerResult<HeartbeatAck> {
        let target = RequestTarget {
            worker_id: Some(worker_id),
            job_id: None,
        };
        self.request_data::<(), _>(
            Method::POST,
            &format!("/api/workers/{worker_id}/heartbeat"),
            None,
            target,
        )
        .await
    }

    pub async fn start_job(&self, worker_id: &str, job_id: i64) -> SchedulerResult<Job> {
        let target = RequestTarget {
            worker_id: Some(worker_id),
            job_id: Some(job_id),
        };
        self.request_data::<(), _>(
            Method::POST,
            &format!("/api/workers/{worker_id}/jobs/{job_id}/start"),
            None,
            target,
        )
        .await
    }

    /// 上报执行结果
    ///
    /// 超时后的重试可能遇到上一次请求已生效的情况，此时服务端返回 `StaleClaim`。
    pub async fn report_result(
        &self,
        worker_id: &str,
        job_id: i64,
        outcome: &JobOutcome,
    ) -> SchedulerResult<Job> {
        let target = RequestTarget {
            worker_id: Some(worker_id),
            job_id: Some(job_id),
        };
        self.request_data(
            Method::POST,
            &format!("/api/workers/{worker_id}/jobs/{job_id}/result"),
            Some(outcome),
            target,
        )
        .await
    }

    pub async fn submit_job(&self, submission: &JobSubmission) -> SchedulerResult<SubmittedJob> {
        self.request_data(
            Method::POST,
            "/api/jobs",
            Some(submission),
            RequestTarget::default(),
        )
        .await
    }

    pub async fn get_job(&self, job_id: i64) -> SchedulerResult<Job> {
        let target = RequestTarget {
            worker_id: None,
            job_id: Some(job_id),
        };
        self.request_data::<(), _>(Method::GET, &format!("/api/jobs/{job_id}"), None, target)
            .await
    }

    pub async fn cancel_job(&self, job_id: i64) -> SchedulerResult<Job> {
        let target = RequestTarget {
            worker_id: None,
            job_id: Some(job_id),
        };
        self.request_data::<(), _>(
            Method::POST,
            &format!("/api/jobs/{job_id}/cancel"),
            None,
            target,
        )
        .await
    }

    async fn request_data<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        target: RequestTarget<'_>,
    ) -> SchedulerResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(method, path, body, target)
            .await?
            .ok_or_else(|| SchedulerError::Serialization(format!("{path} 的响应缺少data字段")))
    }

    async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        target: RequestTarget<'_>,
    ) -> SchedulerResult<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut retry = 0;
        loop {
            match self.send_once(method.clone(), &url, body, target).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() && retry < self.config.max_retries => {
                    retry += 1;
                    let delay = self.config.backoff(retry);
                    warn!(
                        "{} {} 失败，{:?} 后第 {} 次重试: {}",
                        method, path, delay, retry, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once<B, T>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        target: RequestTarget<'_>,
    ) -> SchedulerResult<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut builder = self.http_client.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;

        if status.is_success() {
            let envelope: Envelope<T> = serde_json::from_slice(&bytes)
                .map_err(|e| SchedulerError::Serialization(format!("解析 {url} 的响应失败: {e}")))?;
            if !envelope.success {
                return Err(SchedulerError::Internal(
                    envelope.message.unwrap_or_else(|| "服务端返回失败".to_string()),
                ));
            }
            debug!("请求成功: {} ({})", url, status);
            return Ok(envelope.data);
        }

        let (error_type, message) = match serde_json::from_slice::<Envelope<serde_json::Value>>(&bytes)
        {
            Ok(envelope) => (
                envelope.error_type.unwrap_or_default(),
                envelope.message.unwrap_or_default(),
            ),
            Err(_) => (String::new(), String::from_utf8_lossy(&bytes).into_owned()),
        };
        Err(remote_error(status, &error_type, message, target))
    }
}

fn transport_error(e: reqwest::Error) -> SchedulerError {
    if e.is_timeout() {
        SchedulerError::Timeout(e.to_string())
    } else if e.is_decode() {
        SchedulerError::Serialization(e.to_string())
    } else {
        SchedulerError::Network(e.to_string())
    }
}

fn remote_error(
    status: StatusCode,
    error_type: &str,
    message: String,
    target: RequestTarget<'_>,
) -> SchedulerError {
    let worker_id = || target.worker_id.unwrap_or_default().to_string();
    let job_id = target.job_id.unwrap_or_default();

    match (status, error_type) {
        (_, "JOB_NOT_FOUND") => SchedulerError::job_not_found(job_id),
        (_, "WORKER_NOT_FOUND") => SchedulerError::worker_not_found(worker_id()),
        (_, "CALENDAR_NOT_FOUND") => SchedulerError::calendar_not_found(message),
        (_, "STALE_CLAIM") => SchedulerError::StaleClaim {
            worker_id: worker_id(),
            job_id,
        },
        (_, "VERSION_CONFLICT") => match target.job_id {
            Some(id) => SchedulerError::version_conflict("job", id, 0),
            None => SchedulerError::version_conflict("worker", worker_id(), 0),
        },
        (_, "CONFIGURATION_ERROR") => SchedulerError::Configuration(message),
        (StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT, _) => {
            SchedulerError::Timeout(format!("HTTP {status}: {message}"))
        }
        (StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE, _) => {
            SchedulerError::Network(format!("HTTP {status}: {message}"))
        }
        (s, _) if s.is_client_error() => SchedulerError::validation_error(format!(
            "请求被拒绝 (HTTP {status}): {message}"
        )),
        _ => SchedulerError::Internal(format!("HTTP {status}: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_keeps_context() {
        let target = RequestTarget {
            worker_id: Some("w-1"),
            job_id: Some(7),
        };

        let err = remote_error(StatusCode::CONFLICT, "STALE_CLAIM", String::new(), target);
        assert!(matches!(
            err,
            SchedulerError::StaleClaim { ref worker_id, job_id: 7 } if worker_id == "w-1"
        ));

        let err = remote_error(StatusCode::NOT_FOUND, "JOB_NOT_FOUND", String::new(), target);
        assert!(matches!(err, SchedulerError::JobNotFound { id: 7 }));

        let err = remote_error(StatusCode::CONFLICT, "VERSION_CONFLICT", String::new(), target);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_remote_error_by_status() {
        let target = RequestTarget::default();

        let err = remote_error(StatusCode::SERVICE_UNAVAILABLE, "", "down".into(), target);
        assert!(err.is_retryable());

        let err = remote_error(StatusCode::REQUEST_TIMEOUT, "", String::new(), target);
        assert!(matches!(err, SchedulerError::Timeout(_)));

        let err = remote_error(StatusCode::UNPROCESSABLE_ENTITY, "", "missing field".into(), target);
        assert!(matches!(err, SchedulerError::ValidationError(_)));
        assert!(!err.is_retryable());

        let err = remote_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "x".into(), target);
        assert!(matches!(err, SchedulerError::Internal(_)));
    }
}
