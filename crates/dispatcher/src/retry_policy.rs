use chrono::{DateTime, Duration, Utc};
use scheduler_config::RetryConfig;
use scheduler_domain::{start_of_day, Calendar};
use scheduler_errors::SchedulerResult;
use tracing::debug;

/// 日历感知的重试退避策略
///
/// `backoff = min(base * multiplier^(attempt-1), max)`，可选随机抖动；
/// 重试时间不晚于下一个工作日零点，并且总是落在工作日上。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// 第 `attempt` 次尝试失败后的退避时长（秒）
    pub fn backoff_seconds(&self, attempt: u32) -> f64 {
        let base = self.config.base_interval_seconds as f64;
        let max = self.config.max_interval_seconds as f64;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;

        let capped = (base * self.config.backoff_multiplier.powi(exponent)).min(max);
        if self.config.jitter_factor <= 0.0 {
            return capped;
        }
        let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        (capped + jitter).max(0.0)
    }

    /// 计算重试时间
    pub fn retry_at(
        &self,
        calendar: &Calendar,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>> {
        let next_working_start = start_of_day(calendar.next_working_day(now.date_naive())?);
        // 先按秒截断到下一个工作日零点，再换算成时长，避免超大退避溢出
        let until_next_working = (next_working_start - now).num_milliseconds() as f64 / 1000.0;
        let delay_seconds = self.backoff_seconds(attempt).min(until_next_working);
        let backoff_at = now + Duration::milliseconds((delay_seconds * 1000.0) as i64);
        let retry_at = calendar.align_to_working_day(backoff_at)?;

        debug!(
            "第 {} 次尝试失败，日历 {} 下的重试时间: {}",
            attempt,
            calendar.key(),
            retry_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        Ok(retry_at)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
