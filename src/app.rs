use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use scheduler_api::{create_app, AppState};
use scheduler_config::{AppConfig, StorageBackend};
use scheduler_dispatcher::SchedulerService;
use scheduler_domain::Repositories;
use scheduler_infrastructure::{InMemoryStore, SqliteStore};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{info, warn};

/// 主应用程序
pub struct Application {
    config: AppConfig,
    service: Arc<SchedulerService>,
    metrics_handle: Option<PrometheusHandle>,
}

impl Application {
    /// 按配置选择存储并组装调度服务
    pub async fn new(config: AppConfig) -> Result<Self> {
        let repos = build_repositories(&config).await?;
        let service = Arc::new(SchedulerService::from_config(repos, &config));

        let metrics_handle = if config.observability.metrics_enabled {
            install_metrics_recorder()
        } else {
            None
        };

        Ok(Self {
            config,
            service,
            metrics_handle,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service(&self) -> Arc<SchedulerService> {
        Arc::clone(&self.service)
    }

    /// 绑定API监听地址
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = &self.config.api.bind_address;
        TcpListener::bind(address)
            .await
            .with_context(|| format!("绑定API地址失败: {address}"))
    }

    /// 按配置绑定地址后运行
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let listener = if self.config.api.enabled {
            Some(self.bind().await?)
        } else {
            None
        };
        self.run_with_listener(listener, shutdown_rx).await
    }

    /// 启动调度循环与API服务，直到收到关闭信号
    pub async fn run_with_listener(
        &self,
        listener: Option<TcpListener>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut loops: Vec<JoinHandle<()>> = Vec::new();

        if self.config.dispatcher.enabled {
            let dispatcher = self.service.dispatcher();
            loops.push(tokio::spawn(dispatcher.run(shutdown_rx.resubscribe())));
        }

        if self.config.health_monitor.enabled {
            let monitor = self.service.health_monitor();
            loops.push(tokio::spawn(monitor.run(shutdown_rx.resubscribe())));
        }

        match listener {
            Some(listener) => {
                let address = listener
                    .local_addr()
                    .context("读取API监听地址失败")?;
                let mut state = AppState::new(self.service());
                if let Some(handle) = &self.metrics_handle {
                    state = state.with_metrics(handle.clone());
                }
                let app = create_app(state, &self.config.api);

                info!("API服务器监听 {}", address);
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                        info!("API服务器收到关闭信号");
                    })
                    .await
                    .context("API服务器运行失败")?;
            }
            None => {
                let _ = shutdown_rx.recv().await;
            }
        }

        for handle in loops {
            if let Err(e) = handle.await {
                warn!("后台循环异常退出: {}", e);
            }
        }
        info!("调度服务已停止");
        Ok(())
    }
}

/// 根据存储后端构建仓储集合
pub async fn build_repositories(config: &AppConfig) -> Result<Repositories> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("使用内存存储");
            Ok(Repositories::from_store(Arc::new(InMemoryStore::new())))
        }
        StorageBackend::Sqlite => {
            info!("使用SQLite存储: {}", config.database.url);
            let store = SqliteStore::connect(&config.database)
                .await
                .context("连接SQLite数据库失败")?;
            Ok(Repositories::from_store(Arc::new(store)))
        }
    }
}

/// 安装全局Prometheus记录器，进程内只能成功一次
fn install_metrics_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("安装Prometheus指标记录器失败，/metrics 不可用: {}", e);
            None
        }
    }
}
