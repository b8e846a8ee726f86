//! 工作日历
//!
//! 回答"某天是否为工作日"以及工作日加减运算。日历是不可变快照：
//! 更新节假日或工作日配置会产生一个新版本，旧快照上的计算结果保持不变。
//!
//! 判定规则：
//! - 工作日(business day)：星期几在 `business_days` 中被标记为 true
//! - 工作日(working day)：是工作日且不在节假日集合中
//!
//! 节假日按天比较，时间部分被忽略。

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use scheduler_errors::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};

/// 单次查找允许跨越的最大自然日数（约十年）
pub const MAX_CALENDAR_SCAN_DAYS: u32 = 3650;

/// 未显式指定日历时使用的key
pub const DEFAULT_CALENDAR_KEY: &str = "default";

/// 一周七天的工作日配置，每一天都必须显式给出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessDays {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl Default for BusinessDays {
    fn default() -> Self {
        Self {
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: false,
            sunday: false,
        }
    }
}

impl BusinessDays {
    pub fn every_day() -> Self {
        Self {
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: true,
            sunday: true,
        }
    }

    pub fn is_business_day(&self, weekday: Weekday) -> bool {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }

    pub fn with(mut self, weekday: Weekday, active: bool) -> Self {
        let slot = match weekday {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        };
        *slot = active;
        self
    }

    pub fn has_any(&self) -> bool {
        self.monday
            || self.tuesday
            || self.wednesday
            || self.thursday
            || self.friday
            || self.saturday
            || self.sunday
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

fn step(date: NaiveDate, direction: Direction) -> SchedulerResult<NaiveDate> {
    let next = match direction {
        Direction::Forward => date.succ_opt(),
        Direction::Backward => date.pred_opt(),
    };
    next.ok_or_else(|| SchedulerError::config_error(format!("日期 {date} 超出可表示范围")))
}

/// 某一天的零点(UTC)
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// 存储与传输使用的日历记录，反序列化时经过 [`Calendar`] 的校验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarRecord {
    pub tenant_id: Option<String>,
    pub key: String,
    pub name: String,
    pub holidays: BTreeSet<NaiveDate>,
    pub business_days: BusinessDays,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// 不可变的工作日历快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CalendarRecord", into = "CalendarRecord")]
pub struct Calendar {
    tenant_id: Option<String>,
    key: String,
    name: String,
    holidays: BTreeSet<NaiveDate>,
    business_days: BusinessDays,
    version: i64,
    created_at: DateTime<Utc>,
}

impl Calendar {
    /// 创建第一个版本的日历
    pub fn new(
        tenant_id: Option<String>,
        key: impl Into<String>,
        name: impl Into<String>,
        holidays: impl IntoIterator<Item = NaiveDate>,
        business_days: BusinessDays,
    ) -> SchedulerResult<Self> {
        Self::from_record(CalendarRecord {
            tenant_id,
            key: key.into(),
            name: name.into(),
            holidays: holidays.into_iter().collect(),
            business_days,
            version: 1,
            created_at: Utc::now(),
        })
    }

    /// 内置标准日历：周一至周五，无节假日
    pub fn standard() -> Self {
        Self {
            tenant_id: None,
            key: DEFAULT_CALENDAR_KEY.to_string(),
            name: "标准工作日历".to_string(),
            holidays: BTreeSet::new(),
            business_days: BusinessDays::default(),
            version: 0,
            created_at: start_of_day(NaiveDate::default()),
        }
    }

    pub fn from_record(record: CalendarRecord) -> SchedulerResult<Self> {
        if record.key.trim().is_empty() {
            return Err(SchedulerError::validation_error("calendar.key 不能为空"));
        }
        if record.name.trim().is_empty() {
            return Err(SchedulerError::validation_error("calendar.name 不能为空"));
        }
        if !record.business_days.has_any() {
            return Err(SchedulerError::config_error(format!(
                "日历 {} 没有任何工作日",
                record.key
            )));
        }
        if record.version < 0 {
            return Err(SchedulerError::validation_error("calendar.version 不能为负数"));
        }
        Ok(Self {
            tenant_id: record.tenant_id,
            key: record.key,
            name: record.name,
            holidays: record.holidays,
            business_days: record.business_days,
            version: record.version,
            created_at: record.created_at,
        })
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
    pub fn key(&self) -> &str {
        &self.key
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn holidays(&self) -> &BTreeSet<NaiveDate> {
        &self.holidays
    }
    pub fn business_days(&self) -> BusinessDays {
        self.business_days
    }
    pub fn version(&self) -> i64 {
        self.version
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        self.business_days.is_business_day(date.weekday())
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.is_business_day(date) && !self.is_holiday(date)
    }

    /// `from` 之后（不含）的第一个工作日
    pub fn next_working_day(&self, from: NaiveDate) -> SchedulerResult<NaiveDate> {
        self.scan(from, Direction::Forward)
    }

    /// `from` 之前（不含）的第一个工作日
    pub fn previous_working_day(&self, from: NaiveDate) -> SchedulerResult<NaiveDate> {
        self.scan(from, Direction::Backward)
    }

    fn scan(&self, from: NaiveDate, direction: Direction) -> SchedulerResult<NaiveDate> {
        let mut current = from;
        for _ in 0..MAX_CALENDAR_SCAN_DAYS {
            current = step(current, direction)?;
            if self.is_working_day(current) {
                return Ok(current);
            }
        }
        Err(SchedulerError::config_error(format!(
            "日历 {} 在 {} 天内找不到工作日",
            self.key, MAX_CALENDAR_SCAN_DAYS
        )))
    }

    /// 按工作日加减，`days` 为负时向过去推算；`days == 0` 原样返回
    pub fn add_working_days(&self, date: NaiveDate, days: i64) -> SchedulerResult<NaiveDate> {
        if days == 0 {
            return Ok(date);
        }
        let direction = if days > 0 {
            Direction::Forward
        } else {
            Direction::Backward
        };
        let mut remaining = days.unsigned_abs();
        let mut current = date;
        let mut idle_steps = 0u32;

        while remaining > 0 {
            current = step(current, direction)?;
            if self.is_working_day(current) {
                remaining -= 1;
                idle_steps = 0;
            } else {
                idle_steps += 1;
                if idle_steps >= MAX_CALENDAR_SCAN_DAYS {
                    return Err(SchedulerError::config_error(format!(
                        "日历 {} 在 {} 天内找不到工作日",
                        self.key, MAX_CALENDAR_SCAN_DAYS
                    )));
                }
            }
        }
        Ok(current)
    }

    /// 闭区间内的全部工作日，`start > end` 时为空
    pub fn working_days_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        if start > end {
            return Vec::new();
        }
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_working_day(*d))
            .collect()
    }

    /// 把时刻对齐到工作时间：当天是工作日则原样返回，否则取下一个工作日零点
    pub fn align_to_working_day(&self, at: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
        let date = at.date_naive();
        if self.is_working_day(date) {
            return Ok(at);
        }
        Ok(start_of_day(self.next_working_day(date)?))
    }

    /// 以新的节假日集合生成下一个版本
    pub fn update_holidays(
        &self,
        holidays: impl IntoIterator<Item = NaiveDate>,
    ) -> SchedulerResult<Calendar> {
        let mut record = self.next_record();
        record.holidays = holidays.into_iter().collect();
        Self::from_record(record)
    }

    /// 以新的工作日配置生成下一个版本
    pub fn update_business_days(&self, business_days: BusinessDays) -> SchedulerResult<Calendar> {
        let mut record = self.next_record();
        record.business_days = business_days;
        Self::from_record(record)
    }

    fn next_record(&self) -> CalendarRecord {
        let mut record = CalendarRecord::from(self.clone());
        record.version = self.version + 1;
        record.created_at = Utc::now();
        record
    }
}

impl TryFrom<CalendarRecord> for Calendar {
    type Error = SchedulerError;

    fn try_from(record: CalendarRecord) -> Result<Self, Self::Error> {
        Calendar::from_record(record)
    }
}

impl From<Calendar> for CalendarRecord {
    fn from(calendar: Calendar) -> Self {
        Self {
            tenant_id: calendar.tenant_id,
            key: calendar.key,
            name: calendar.name,
            holidays: calendar.holidays,
            business_days: calendar.business_days,
            version: calendar.version,
            created_at: calendar.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn christmas_calendar() -> Calendar {
        Calendar::new(
            Some("acme".to_string()),
            "default",
            "ACME",
            [date(2025, 12, 25)],
            BusinessDays::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_christmas_scenario() {
        let calendar = christmas_calendar();
        assert!(!calendar.is_working_day(date(2025, 12, 25)));
        assert!(calendar.is_working_day(date(2025, 12, 26)));
        assert_eq!(
            calendar.next_working_day(date(2025, 12, 24)).unwrap(),
            date(2025, 12, 26)
        );
    }

    #[test]
    fn test_working_day_is_business_day_and_not_holiday() {
        let calendar = christmas_calendar();
        for d in date(2025, 12, 1).iter_days().take(60) {
            assert_eq!(
                calendar.is_working_day(d),
                calendar.is_business_day(d) && !calendar.is_holiday(d)
            );
        }
    }

    #[test]
    fn test_next_working_day_properties() {
        let calendar = christmas_calendar();
        for d in date(2025, 12, 1).iter_days().take(45) {
            let next = calendar.next_working_day(d).unwrap();
            assert!(next > d);
            assert!(calendar.is_working_day(next));
            assert!(calendar
                .working_days_in_range(d.succ_opt().unwrap(), next.pred_opt().unwrap())
                .is_empty());
        }
    }

    #[test]
    fn test_previous_working_day_skips_weekend() {
        let calendar = christmas_calendar();
        // 2025-12-29 是周一
        assert_eq!(
            calendar.previous_working_day(date(2025, 12, 29)).unwrap(),
            date(2025, 12, 26)
        );
    }

    #[test]
    fn test_add_working_days_zero_returns_input() {
        let calendar = christmas_calendar();
        let saturday = date(2025, 12, 27);
        assert_eq!(calendar.add_working_days(saturday, 0).unwrap(), saturday);
    }

    #[test]
    fn test_add_working_days_across_holiday() {
        let calendar = christmas_calendar();
        // 周三 + 1 跳过圣诞节落在周五
        assert_eq!(
            calendar.add_working_days(date(2025, 12, 24), 1).unwrap(),
            date(2025, 12, 26)
        );
        assert_eq!(
            calendar.add_working_days(date(2025, 12, 24), 3).unwrap(),
            date(2025, 12, 30)
        );
        assert_eq!(
            calendar.add_working_days(date(2025, 12, 26), -1).unwrap(),
            date(2025, 12, 24)
        );
    }

    #[test]
    fn test_add_working_days_direction_symmetry() {
        let calendar = christmas_calendar();
        let working_days = calendar.working_days_in_range(date(2025, 12, 1), date(2026, 1, 31));
        for d in working_days {
            for n in [1i64, 2, 5, 13] {
                let forward = calendar.add_working_days(d, n).unwrap();
                assert_eq!(calendar.add_working_days(forward, -n).unwrap(), d);
                let backward = calendar.add_working_days(d, -n).unwrap();
                assert_eq!(calendar.add_working_days(backward, n).unwrap(), d);
            }
        }
    }

    #[test]
    fn test_working_days_in_range_inclusive() {
        let calendar = christmas_calendar();
        let days = calendar.working_days_in_range(date(2025, 12, 22), date(2025, 12, 28));
        assert_eq!(
            days,
            vec![
                date(2025, 12, 22),
                date(2025, 12, 23),
                date(2025, 12, 24),
                date(2025, 12, 26)
            ]
        );
        assert!(calendar
            .working_days_in_range(date(2025, 12, 28), date(2025, 12, 22))
            .is_empty());
    }

    #[test]
    fn test_no_business_days_is_configuration_error() {
        let none = BusinessDays::every_day()
            .with(Weekday::Mon, false)
            .with(Weekday::Tue, false)
            .with(Weekday::Wed, false)
            .with(Weekday::Thu, false)
            .with(Weekday::Fri, false)
            .with(Weekday::Sat, false)
            .with(Weekday::Sun, false);
        let err = Calendar::new(None, "empty", "Empty", [], none).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
        assert!(matches!(
            christmas_calendar().update_business_days(none),
            Err(SchedulerError::Configuration(_))
        ));
    }

    #[test]
    fn test_scan_is_bounded_when_every_day_is_a_holiday() {
        let sundays_only = BusinessDays::every_day()
            .with(Weekday::Mon, false)
            .with(Weekday::Tue, false)
            .with(Weekday::Wed, false)
            .with(Weekday::Thu, false)
            .with(Weekday::Fri, false)
            .with(Weekday::Sat, false);
        let start = date(2025, 1, 1);
        let holidays: Vec<NaiveDate> = start
            .iter_days()
            .take(MAX_CALENDAR_SCAN_DAYS as usize + 10)
            .filter(|d| d.weekday() == Weekday::Sun)
            .collect();
        let calendar = Calendar::new(None, "closed", "Closed", holidays, sundays_only).unwrap();
        assert!(matches!(
            calendar.next_working_day(start),
            Err(SchedulerError::Configuration(_))
        ));
        assert!(matches!(
            calendar.add_working_days(start, 1),
            Err(SchedulerError::Configuration(_))
        ));
    }

    #[test]
    fn test_updates_produce_new_versions() {
        let calendar = christmas_calendar();
        let updated = calendar.update_holidays([date(2026, 1, 1)]).unwrap();

        assert_eq!(calendar.version(), 1);
        assert_eq!(updated.version(), 2);
        assert!(calendar.is_holiday(date(2025, 12, 25)));
        assert!(!updated.is_holiday(date(2025, 12, 25)));
        assert!(updated.is_holiday(date(2026, 1, 1)));

        let weekend_shop = updated
            .update_business_days(BusinessDays::default().with(Weekday::Sat, true))
            .unwrap();
        assert_eq!(weekend_shop.version(), 3);
        assert!(weekend_shop.is_working_day(date(2026, 1, 3)));
        assert!(!updated.is_working_day(date(2026, 1, 3)));
    }

    #[test]
    fn test_align_to_working_day() {
        let calendar = christmas_calendar();
        let on_holiday = Utc.with_ymd_and_hms(2025, 12, 25, 15, 30, 0).unwrap();
        assert_eq!(
            calendar.align_to_working_day(on_holiday).unwrap(),
            Utc.with_ymd_and_hms(2025, 12, 26, 0, 0, 0).unwrap()
        );
        let on_workday = Utc.with_ymd_and_hms(2025, 12, 24, 9, 0, 0).unwrap();
        assert_eq!(calendar.align_to_working_day(on_workday).unwrap(), on_workday);
    }

    #[test]
    fn test_deserialization_enforces_invariants() {
        let json = serde_json::json!({
            "tenant_id": null,
            "key": "default",
            "name": "x",
            "holidays": ["2025-12-25"],
            "business_days": {
                "monday": true, "tuesday": true, "wednesday": true, "thursday": true,
                "friday": true, "saturday": false
            },
            "version": 1,
            "created_at": "2025-01-01T00:00:00Z"
        });
        // 缺少 sunday
        assert!(serde_json::from_value::<Calendar>(json).is_err());

        let calendar = christmas_calendar();
        let round_trip: Calendar =
            serde_json::from_value(serde_json::to_value(&calendar).unwrap()).unwrap();
        assert_eq!(round_trip, calendar);
    }
}
