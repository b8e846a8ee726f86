use std::sync::Arc;

use scheduler_domain::{Calendar, CalendarRepository};
use scheduler_errors::SchedulerResult;
use tracing::debug;

/// 按 租户日历 -> 全局日历 -> 标准日历 的顺序解析任务使用的日历
#[derive(Clone)]
pub struct CalendarResolver {
    calendars: Arc<dyn CalendarRepository>,
}

impl CalendarResolver {
    pub fn new(calendars: Arc<dyn CalendarRepository>) -> Self {
        Self { calendars }
    }

    pub async fn resolve(&self, tenant_id: &str, key: &str) -> SchedulerResult<Calendar> {
        if let Some(calendar) = self.calendars.find_latest(Some(tenant_id), key).await? {
            return Ok(calendar);
        }
        if let Some(calendar) = self.calendars.find_latest(None, key).await? {
            debug!("租户 {} 没有日历 {}，使用全局日历", tenant_id, key);
            return Ok(calendar);
        }
        debug!("日历 {} 未配置，使用标准日历", key);
        Ok(Calendar::standard())
    }
}
