use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::dispatcher_client::DispatcherClient;

/// 周期性发送心跳，并把服务端要求停止的任务转交给执行方
pub struct HeartbeatManager {
    worker_id: String,
    heartbeat_interval: Duration,
    dispatcher_client: Arc<DispatcherClient>,
    cancel_tx: Option<mpsc::Sender<i64>>,
}

impl HeartbeatManager {
    pub fn new(worker_id: impl Into<String>, dispatcher_client: Arc<DispatcherClient>) -> Self {
        let heartbeat_interval = dispatcher_client.config().heartbeat_interval();
        Self {
            worker_id: worker_id.into(),
            heartbeat_interval,
            dispatcher_client,
            cancel_tx: None,
        }
    }

    pub fn with_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// 每个被请求取消的任务id只发送一次
    pub fn with_cancel_listener(mut self, cancel_tx: mpsc::Sender<i64>) -> Self {
        self.cancel_tx = Some(cancel_tx);
        self
    }

    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut heartbeat_interval = interval(self.heartbeat_interval);
            let mut notified: HashSet<i64> = HashSet::new();

            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => {
                        self.beat(&mut notified).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker {} 心跳任务退出", self.worker_id);
                        break;
                    }
                }
            }
        })
    }

    async fn beat(&self, notified: &mut HashSet<i64>) {
        let ack = match self.dispatcher_client.heartbeat(&self.worker_id).await {
            Ok(ack) => ack,
            Err(e) => {
                error!("Worker {} 发送心跳失败: {}", self.worker_id, e);
                return;
            }
        };
        debug!("Worker {} 心跳已确认", self.worker_id);

        // 已经结束的任务不会再出现在应答里
        notified.retain(|id| ack.cancel_requested_job_ids.contains(id));
        let Some(cancel_tx) = &self.cancel_tx else {
            return;
        };
        for job_id in ack.cancel_requested_job_ids {
            if notified.insert(job_id) {
                info!("任务 {} 被请求取消，通知Worker {}", job_id, self.worker_id);
                if cancel_tx.send(job_id).await.is_err() {
                    warn!("取消通知的接收方已关闭");
                    return;
                }
            }
        }
    }
}
