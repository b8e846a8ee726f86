//! Worker进程使用的调度服务客户端：注册、心跳、确认开始与上报结果。

pub mod config;
pub mod dispatcher_client;
pub mod heartbeat_manager;

pub use config::ClientConfig;
pub use dispatcher_client::{DispatcherClient, SubmittedJob};
pub use heartbeat_manager::HeartbeatManager;

/// 以主机名作为默认的Worker名称
pub fn local_worker_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}
