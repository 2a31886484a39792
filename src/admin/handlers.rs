//! Admin API handlers.
//!
//! Every response uses the `{code, message, data}` envelope: `code` is 0 on
//! success and the HTTP status on failure.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::admin::repository::{PersistedSettings, RepositoryError};
use crate::admin::AdminState;
use crate::config::{LogSettings, SettingsPatch, ValidationError};
use crate::sink::{CustomFields, LogFilter, LogStats, SinkError, StoredLog};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_RETENTION_DAYS: u32 = 7;
const MAX_UPDATE_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn success<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 0,
        message: "success".to_string(),
        data: Some(data),
    })
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<Value> {
            code: self.status.as_u16(),
            message: self.message,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SinkError> for ApiError {
    fn from(e: SinkError) -> Self {
        tracing::error!(error = %e, "admin store operation failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("store error: {e}"))
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        tracing::error!(error = %e, "admin settings operation failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("settings error: {e}"))
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::bad_request(e.to_string())
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub async fn health() -> Json<ApiResponse<Value>> {
    Json(ApiResponse {
        code: 0,
        message: "ok".to_string(),
        data: Some(json!({ "version": env!("CARGO_PKG_VERSION") })),
    })
}

/// Raw query parameters. Numbers are parsed leniently: unparseable values
/// fall back to their defaults.
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub status_code: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl LogQuery {
    /// Normalised `(page, page_size)`.
    pub fn paging(&self) -> (i64, i64) {
        let page = parse_num(&self.page).filter(|p| *p >= 1).unwrap_or(1);
        let page_size = parse_num(&self.page_size)
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        (page, page_size)
    }

    pub fn filter(&self) -> Result<LogFilter, ApiError> {
        let status_code = parse_num(&self.status_code)
            .filter(|s| *s > 0)
            .and_then(|s| u16::try_from(s).ok());

        Ok(LogFilter {
            method: non_empty(&self.method),
            path: non_empty(&self.path),
            status_code,
            start_time: parse_time("start_time", &self.start_time)?,
            end_time: parse_time("end_time", &self.end_time)?,
        })
    }
}

/// Row offset of `page`. Pages beyond the addressable range saturate and
/// come back empty.
fn page_offset(page: i64, page_size: i64) -> i64 {
    (page - 1).saturating_mul(page_size)
}

fn parse_num(raw: &Option<String>) -> Option<i64> {
    raw.as_deref().and_then(|v| v.trim().parse().ok())
}

fn non_empty(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_time(name: &str, raw: &Option<String>) -> Result<Option<DateTime<Utc>>, ApiError> {
    match non_empty(raw) {
        None => Ok(None),
        Some(v) => DateTime::parse_from_rfc3339(&v)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| ApiError::bad_request(format!("{name} must be an RFC 3339 timestamp"))),
    }
}

#[derive(Debug, Serialize)]
pub struct LogPage {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub logs: Vec<StoredLog>,
}

pub async fn list_logs(
    State(state): State<AdminState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<LogPage> {
    let (page, page_size) = query.paging();
    let filter = query.filter()?;

    let total = state.store.count(&filter).await?;
    let logs = state
        .store
        .query(page_offset(page, page_size), page_size, &filter)
        .await?;

    Ok(success(LogPage {
        total,
        page,
        page_size,
        logs,
    }))
}

pub async fn get_log(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> ApiResult<StoredLog> {
    let id: i64 = id
        .parse()
        .map_err(|_| ApiError::bad_request("invalid log id"))?;

    match state.store.get_by_id(id).await? {
        Some(log) => Ok(success(log)),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "log not found")),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeQuery {
    pub days: Option<String>,
}

pub async fn delete_logs(
    State(state): State<AdminState>,
    Query(query): Query<PurgeQuery>,
) -> ApiResult<Value> {
    let days = parse_num(&query.days)
        .filter(|d| *d >= 1)
        .and_then(|d| u32::try_from(d).ok())
        .unwrap_or(DEFAULT_RETENTION_DAYS);

    let deleted = state.store.delete_older_than(days).await?;
    Ok(success(json!({ "deleted_count": deleted, "days": days })))
}

pub async fn get_stats(State(state): State<AdminState>) -> ApiResult<LogStats> {
    Ok(success(state.store.stats().await?))
}

/// Admin view of the live logging settings.
#[derive(Debug, Serialize)]
pub struct ConfigView {
    pub enabled: bool,
    pub skip_paths: Vec<String>,
    pub custom_fields: CustomFields,
    #[serde(rename = "async")]
    pub async_mode: bool,
    pub buffer_size: usize,
    pub time_format: String,
}

impl From<&LogSettings> for ConfigView {
    fn from(settings: &LogSettings) -> Self {
        Self {
            enabled: settings.enabled,
            skip_paths: settings.skip_paths.clone(),
            custom_fields: settings.custom_fields.clone(),
            async_mode: settings.async_mode,
            buffer_size: settings.buffer_size,
            time_format: settings.time_format.clone(),
        }
    }
}

pub async fn get_config(State(state): State<AdminState>) -> ApiResult<ConfigView> {
    Ok(success(ConfigView::from(&*state.runtime.snapshot())))
}

/// Persist a partial update, then apply it to the running settings.
pub async fn update_config(
    State(state): State<AdminState>,
    payload: Result<Json<SettingsPatch>, JsonRejection>,
) -> ApiResult<ConfigView> {
    let Json(patch) =
        payload.map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))?;

    let _guard = state.update_lock.lock().await;
    // A config file reload may replace the snapshot while the row is being
    // saved; recompute from the newer snapshot instead of overwriting it.
    for _ in 0..MAX_UPDATE_ATTEMPTS {
        let base = state.runtime.snapshot();
        let next = patch.apply_to(&base).normalized()?;
        state
            .settings
            .save(&PersistedSettings::from_settings(&next))
            .await?;
        if let Some(applied) = state.runtime.apply_if_current(&base, next)? {
            return Ok(success(ConfigView::from(&*applied)));
        }
        tracing::debug!("logging settings changed during admin update, retrying");
    }

    Err(ApiError::new(
        StatusCode::CONFLICT,
        "logging settings are changing concurrently, retry the update",
    ))
}

pub async fn reset_config(State(state): State<AdminState>) -> ApiResult<ConfigView> {
    let _guard = state.update_lock.lock().await;
    state.settings.reset().await?;
    let applied = state.runtime.reset();
    Ok(success(ConfigView::from(&*applied)))
}
