use async_trait::async_trait;
use scheduler_domain::{Calendar, CalendarRepository};
use scheduler_errors::{SchedulerError, SchedulerResult};
use tracing::debug;

use super::SqliteStore;
use crate::database::mapping::{is_unique_violation, tenant_column, MappingHelpers, CALENDAR_COLUMNS};

#[async_trait]
impl CalendarRepository for SqliteStore {
    async fn create(&self, calendar: &Calendar) -> SchedulerResult<Calendar> {
        if calendar.version() != 1 {
            return Err(SchedulerError::validation_error("新建日历的版本必须为1"));
        }
        self.publish(calendar).await
    }

    async fn find_latest(
        &self,
        tenant_id: Option<&str>,
        key: &str,
    ) -> SchedulerResult<Option<Calendar>> {
        let row = sqlx::query(&format!(
            "SELECT {CALENDAR_COLUMNS} FROM calendars WHERE tenant_id = ? AND key = ? ORDER BY version DESC LIMIT 1"
        ))
        .bind(tenant_column(tenant_id))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_calendar).transpose()
    }

    async fn find_version(
        &self,
        tenant_id: Option<&str>,
        key: &str,
        version: i64,
    ) -> SchedulerResult<Option<Calendar>> {
        let row = sqlx::query(&format!(
            "SELECT {CALENDAR_COLUMNS} FROM calendars WHERE tenant_id = ? AND key = ? AND version = ?"
        ))
        .bind(tenant_column(tenant_id))
        .bind(key)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        row.as_ref().map(MappingHelpers::row_to_calendar).transpose()
    }

    async fn list_versions(
        &self,
        tenant_id: Option<&str>,
        key: &str,
    ) -> SchedulerResult<Vec<Calendar>> {
        let rows = sqlx::query(&format!(
            "SELECT {CALENDAR_COLUMNS} FROM calendars WHERE tenant_id = ? AND key = ? ORDER BY version"
        ))
        .bind(tenant_column(tenant_id))
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(MappingHelpers::row_to_calendar).collect()
    }

    async fn publish(&self, calendar: &Calendar) -> SchedulerResult<Calendar> {
        let holidays = MappingHelpers::to_json(calendar.holidays(), "holidays")?;
        let business_days = MappingHelpers::to_json(&calendar.business_days(), "business_days")?;
        let tenant = tenant_column(calendar.tenant_id());
        let conflict =
            || SchedulerError::version_conflict("calendar", calendar.key(), calendar.version() - 1);

        // 只有当前最新版本恰好是 version - 1 时才插入
        let result = sqlx::query(
            r#"
            INSERT INTO calendars (tenant_id, key, version, name, holidays, business_days, created_at)
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE (SELECT COALESCE(MAX(version), 0) FROM calendars WHERE tenant_id = ? AND key = ?) = ?
            "#,
        )
        .bind(tenant)
        .bind(calendar.key())
        .bind(calendar.version())
        .bind(calendar.name())
        .bind(holidays)
        .bind(business_days)
        .bind(calendar.created_at())
        .bind(tenant)
        .bind(calendar.key())
        .bind(calendar.version() - 1)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                conflict()
            } else {
                SchedulerError::Database(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(conflict());
        }

        debug!("发布日历 {} 版本 {}", calendar.key(), calendar.version());
        Ok(calendar.clone())
    }
}
