use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use scheduler_domain::BusinessDays;
use scheduler_dispatcher::CalendarDefinition;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, ListResponse},
    routes::AppState,
};

/// 工作日查询的最大跨度
const MAX_RANGE_DAYS: i64 = 3660;

#[derive(Debug, Deserialize)]
pub struct CalendarQueryParams {
    pub tenant_id: Option<String>,
    pub version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WorkingDaysQuery {
    pub tenant_id: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct HolidaysUpdate {
    pub tenant_id: Option<String>,
    pub holidays: Vec<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct BusinessDaysUpdate {
    pub tenant_id: Option<String>,
    pub business_days: BusinessDays,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkingDays {
    pub calendar_key: String,
    pub tenant_id: Option<String>,
    pub version: i64,
    pub working_days: Vec<NaiveDate>,
}

/// 创建日历的第一个版本
pub async fn create_calendar(
    State(state): State<AppState>,
    Json(definition): Json<CalendarDefinition>,
) -> ApiResult<impl IntoResponse> {
    let calendar = state.service.create_calendar(definition).await?;
    Ok(created(calendar))
}

/// 获取日历，未指定版本时返回最新版本
pub async fn get_calendar(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<CalendarQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let calendar = state
        .service
        .get_calendar(params.tenant_id.as_deref(), &key, params.version)
        .await?;
    Ok(success(calendar))
}

pub async fn list_calendar_versions(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<CalendarQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let versions = state
        .service
        .list_calendar_versions(params.tenant_id.as_deref(), &key)
        .await?;
    Ok(success(ListResponse::new(versions)))
}

/// 按任务提交时的解析顺序选择日历，列出区间内的工作日
pub async fn list_working_days(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<WorkingDaysQuery>,
) -> ApiResult<impl IntoResponse> {
    if query.end < query.start {
        return Err(ApiError::BadRequest("end 不能早于 start".to_string()));
    }
    if (query.end - query.start).num_days() > MAX_RANGE_DAYS {
        return Err(ApiError::BadRequest(format!(
            "查询跨度不能超过 {MAX_RANGE_DAYS} 天"
        )));
    }

    let tenant_id = query.tenant_id.unwrap_or_default();
    let calendar = state.service.resolve_calendar(&tenant_id, &key).await?;
    Ok(success(WorkingDays {
        calendar_key: calendar.key().to_string(),
        tenant_id: calendar.tenant_id().map(str::to_string),
        version: calendar.version(),
        working_days: calendar.working_days_in_range(query.start, query.end),
    }))
}

/// 替换节假日并发布新版本
pub async fn update_holidays(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(update): Json<HolidaysUpdate>,
) -> ApiResult<impl IntoResponse> {
    let calendar = state
        .service
        .update_holidays(update.tenant_id.as_deref(), &key, update.holidays)
        .await?;
    Ok(success(calendar))
}

/// 替换每周工作日配置并发布新版本
pub async fn update_business_days(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(update): Json<BusinessDaysUpdate>,
) -> ApiResult<impl IntoResponse> {
    let calendar = state
        .service
        .update_business_days(update.tenant_id.as_deref(), &key, update.business_days)
        .await?;
    Ok(success(calendar))
}
