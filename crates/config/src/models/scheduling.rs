use std::time::Duration;

use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// Worker选择策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategyKind {
    /// 空闲槽位最多优先，其次利用率最低，最后按id
    #[default]
    MostAvailable,
    LeastLoaded,
    RoundRobin,
}

impl DispatchStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStrategyKind::MostAvailable => "most_available",
            DispatchStrategyKind::LeastLoaded => "least_loaded",
            DispatchStrategyKind::RoundRobin => "round_robin",
        }
    }
}

impl std::str::FromStr for DispatchStrategyKind {
    type Err = crate::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "most_available" => Ok(DispatchStrategyKind::MostAvailable),
            "least_loaded" => Ok(DispatchStrategyKind::LeastLoaded),
            "round_robin" => Ok(DispatchStrategyKind::RoundRobin),
            _ => Err(crate::ConfigError::Validation(format!(
                "Invalid dispatch strategy: {s}. Valid options: most_available, least_loaded, round_robin"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub dispatch_interval_seconds: u64,
    pub max_jobs_per_tick: usize,
    pub dispatch_strategy: DispatchStrategyKind,
    /// 单个任务在一次派发中遇到版本冲突时的最大尝试次数
    pub max_assign_attempts: u32,
    /// 连续多少轮找不到Worker后输出告警
    pub starvation_warn_ticks: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatch_interval_seconds: 5,
            max_jobs_per_tick: 500,
            dispatch_strategy: DispatchStrategyKind::MostAvailable,
            max_assign_attempts: 3,
            starvation_warn_ticks: 12,
        }
    }
}

impl DispatcherConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_seconds)
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.dispatch_interval_seconds,
            "dispatcher.dispatch_interval_seconds",
        )?;
        ValidationUtils::validate_count(self.max_jobs_per_tick, "dispatcher.max_jobs_per_tick", 10000)?;
        ValidationUtils::validate_count(
            self.max_assign_attempts as usize,
            "dispatcher.max_assign_attempts",
            100,
        )?;
        ValidationUtils::validate_count(
            self.starvation_warn_ticks as usize,
            "dispatcher.starvation_warn_ticks",
            10000,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    pub enabled: bool,
    pub heartbeat_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub auto_cleanup_offline_workers: bool,
    pub offline_cleanup_threshold_seconds: u64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_timeout_seconds: 300,
            sweep_interval_seconds: 30,
            auto_cleanup_offline_workers: false,
            offline_cleanup_threshold_seconds: 86400,
        }
    }
}

impl HealthMonitorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl ConfigValidator for HealthMonitorConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.heartbeat_timeout_seconds,
            "health_monitor.heartbeat_timeout_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.sweep_interval_seconds,
            "health_monitor.sweep_interval_seconds",
        )?;
        if self.sweep_interval_seconds > self.heartbeat_timeout_seconds {
            return Err(crate::ConfigError::Validation(
                "health_monitor.sweep_interval_seconds must not exceed heartbeat_timeout_seconds"
                    .to_string(),
            ));
        }
        if self.auto_cleanup_offline_workers
            && self.offline_cleanup_threshold_seconds < self.heartbeat_timeout_seconds
        {
            return Err(crate::ConfigError::Validation(
                "health_monitor.offline_cleanup_threshold_seconds must be at least heartbeat_timeout_seconds"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 提交时未指定 `max_attempts` 的任务使用该值
    pub default_max_attempts: u32,
    pub base_interval_seconds: u64,
    pub max_interval_seconds: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            base_interval_seconds: 60,
            max_interval_seconds: 3600,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

/// 重试间隔上限：7天
pub const MAX_RETRY_INTERVAL_SECONDS: u64 = 7 * 24 * 3600;

impl ConfigValidator for RetryConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(
            self.default_max_attempts as usize,
            "retry.default_max_attempts",
            100,
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.base_interval_seconds,
            "retry.base_interval_seconds",
        )?;
        if self.max_interval_seconds < self.base_interval_seconds {
            return Err(crate::ConfigError::Validation(
                "retry.max_interval_seconds must be at least base_interval_seconds".to_string(),
            ));
        }
        if self.max_interval_seconds > MAX_RETRY_INTERVAL_SECONDS {
            return Err(crate::ConfigError::Validation(format!(
                "retry.max_interval_seconds must be less than or equal to {MAX_RETRY_INTERVAL_SECONDS}"
            )));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(crate::ConfigError::Validation(
                "retry.backoff_multiplier must be a finite value >= 1.0".to_string(),
            ));
        }
        ValidationUtils::validate_ratio(self.jitter_factor, "retry.jitter_factor")?;
        Ok(())
    }
}
