//! 调度服务配置：TOML文件、`SCHEDULER_`前缀的环境变量与默认值的分层合并

pub mod models;
pub mod validation;

#[cfg(test)]
mod tests;

pub use models::{
    ApiConfig, AppConfig, DatabaseConfig, DispatchStrategyKind, DispatcherConfig,
    HealthMonitorConfig, LogFormat, ObservabilityConfig, RetryConfig, StorageBackend,
    StorageConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 配置加载与校验错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置校验失败: {0}")]
    Validation(String),

    #[error("读取配置文件失败: {0}")]
    File(#[from] std::io::Error),

    #[error("解析TOML失败: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("合并配置源失败: {0}")]
    Source(#[from] config::ConfigError),
}
