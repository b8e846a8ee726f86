//! Test helper utilities and common testing patterns

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }

    /// Generate test timestamps with offsets
    pub fn timestamp_with_offset(offset_seconds: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(offset_seconds)
    }
}

/// 日期字面量，测试中写起来比 `from_ymd_opt(..).unwrap()` 短
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// UTC时刻字面量
pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Weekday};

    #[test]
    fn test_literals() {
        assert_eq!(date(2025, 12, 25).weekday(), Weekday::Thu);
        assert_eq!(at(2025, 12, 24, 9, 30).date_naive(), date(2025, 12, 24));
    }

    #[tokio::test]
    async fn test_wait_for() {
        let mut calls = 0;
        let ok = TestEnv::wait_for(
            || {
                calls += 1;
                let done = calls >= 3;
                async move { done }
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(ok);
    }
}
