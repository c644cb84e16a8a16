mod job_logs;
mod jobs;

use std::str::FromStr;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use jobdesk_db::Page;
use jobdesk_scheduler::{SchedulerEngine, SchedulerError};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::middleware::{request_id, require_bearer_auth, AuthState, RequestId};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub scheduler: SchedulerEngine,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// One page of a list endpoint.
#[derive(Debug, Serialize)]
pub struct PageData<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
    scheduler: &'static str,
}

impl ResponseMeta {
    pub(crate) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            "service_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// A policy or status code sent either as a string (`"1"`) or a number (`1`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum CodeValue {
    Text(String),
    Number(i64),
}

impl CodeValue {
    pub(crate) fn parse<T>(&self, req_id: &str, field: &str) -> Result<T, ApiError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        };
        raw.parse::<T>().map_err(|e| {
            ApiError::new(req_id, "validation_error", format!("{field}: {e}"))
        })
    }
}

pub(crate) fn parse_optional_code<T>(
    req_id: &str,
    field: &str,
    value: Option<&CodeValue>,
) -> Result<Option<T>, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map(|v| v.parse(req_id, field)).transpose()
}

pub(crate) fn normalize_page(page: Option<i64>, page_size: Option<i64>) -> Page {
    Page::new(
        page.unwrap_or(1),
        page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
    )
}

/// Parses a comma-separated id list such as `3,7,9`.
pub(crate) fn parse_ids(req_id: &str, raw: &str) -> Result<Vec<i64>, ApiError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                ApiError::new(req_id, "validation_error", format!("invalid id '{s}'"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Err(ApiError::new(req_id, "validation_error", "no ids given"));
    }
    Ok(ids)
}

pub(crate) fn parse_id(req_id: &str, raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::new(req_id, "validation_error", format!("invalid id '{raw}'")))
}

pub(crate) fn map_db_error(request_id: String, error: &jobdesk_db::DbError) -> ApiError {
    if matches!(error, jobdesk_db::DbError::NotFound) {
        return ApiError::new(request_id, "not_found", "record not found");
    }
    tracing::error!(error = %error, "database query failed");
    ApiError::new(request_id, "internal_error", "database query failed")
}

pub(crate) fn map_scheduler_error(request_id: &str, error: &SchedulerError) -> ApiError {
    match error {
        SchedulerError::Validation(e) => ApiError::new(request_id, "validation_error", e.to_string()),
        SchedulerError::NotRunning => {
            ApiError::new(request_id, "service_unavailable", "scheduler is not running")
        }
        SchedulerError::Source(e) => map_db_error(request_id.to_owned(), e),
        SchedulerError::NoRuntime(_) => {
            tracing::error!(error = %error, "scheduler error");
            ApiError::new(request_id, "internal_error", "scheduler error")
        }
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

fn protected_router(auth: AuthState) -> Router<AppState> {
    Router::new()
        .route("/api/v1/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/api/v1/jobs/{job_id}",
            get(jobs::get_job)
                .put(jobs::update_job)
                .delete(jobs::delete_jobs),
        )
        .route("/api/v1/jobs/{job_id}/status", put(jobs::change_status))
        .route("/api/v1/jobs/{job_id}/run", post(jobs::run_job))
        .route(
            "/api/v1/job-logs",
            get(job_logs::list_job_logs).delete(job_logs::clean_job_logs),
        )
        .route(
            "/api/v1/job-logs/{job_log_ids}",
            delete(job_logs::delete_job_logs),
        )
        .layer(axum::middleware::from_fn_with_state(
            auth,
            require_bearer_auth,
        ))
}

pub fn build_app(state: AppState, auth: AuthState) -> Router {
    let public_routes = Router::new().route("/api/v1/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth))
        .layer(
            ServiceBuilder::new()
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let meta = ResponseMeta::new(req_id.0);
    let scheduler = if state.scheduler.is_running() {
        "running"
    } else {
        "stopped"
    };

    match jobdesk_db::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                data: HealthData {
                    status: "ok",
                    database: "ok",
                    scheduler,
                },
                meta,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    data: HealthData {
                        status: "degraded",
                        database: "unavailable",
                        scheduler,
                    },
                    meta,
                }),
            )
        }
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
