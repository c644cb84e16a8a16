//! Execution record handlers.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use jobdesk_core::ExecutionStatus;
use jobdesk_db::{JobLogFilter, JobLogRow};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{
    map_db_error, normalize_page, parse_ids, ApiError, ApiResponse, AppState, PageData,
    ResponseMeta,
};

#[derive(Debug, Deserialize)]
pub(crate) struct JobLogQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub job_name: Option<String>,
    pub job_group: Option<String>,
    pub status: Option<String>,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JobLogItem {
    pub job_log_id: i64,
    pub job_name: String,
    pub job_group: String,
    pub invoke_target: String,
    pub job_message: String,
    pub status: String,
    pub exception_info: String,
    pub create_time: DateTime<Utc>,
}

impl From<JobLogRow> for JobLogItem {
    fn from(row: JobLogRow) -> Self {
        Self {
            job_log_id: row.job_log_id,
            job_name: row.job_name,
            job_group: row.job_group,
            invoke_target: row.invoke_target,
            job_message: row.job_message,
            status: row.status,
            exception_info: row.exception_info,
            create_time: row.create_time,
        }
    }
}

/// GET /api/v1/job-logs: newest first.
pub(crate) async fn list_job_logs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<JobLogQuery>,
) -> Result<Json<ApiResponse<PageData<JobLogItem>>>, ApiError> {
    let rid = &req_id.0;
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<ExecutionStatus>)
        .transpose()
        .map_err(|e| ApiError::new(rid, "validation_error", format!("status: {e}")))?;

    if let (Some(begin), Some(end)) = (query.begin_time, query.end_time) {
        if begin > end {
            return Err(ApiError::new(
                rid,
                "validation_error",
                "begin_time must not be after end_time",
            ));
        }
    }

    let page = normalize_page(query.page, query.page_size);
    let filter = JobLogFilter {
        job_name: query.job_name.as_deref().filter(|s| !s.is_empty()),
        job_group: query.job_group.as_deref().filter(|s| !s.is_empty()),
        status,
        begin_time: query.begin_time,
        end_time: query.end_time,
    };

    let paged = jobdesk_db::list_job_logs(&state.pool, filter, page)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: PageData {
            items: paged.items.into_iter().map(JobLogItem::from).collect(),
            total: paged.total,
            page: page.number,
            page_size: page.size,
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// DELETE /api/v1/job-logs/{ids}
pub(crate) async fn delete_job_logs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(ids): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let rid = &req_id.0;
    let ids = parse_ids(rid, &ids)?;

    let deleted = jobdesk_db::delete_job_logs(&state.pool, &ids)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: serde_json::json!({ "deleted": deleted }),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// DELETE /api/v1/job-logs: removes every record.
pub(crate) async fn clean_job_logs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let deleted = jobdesk_db::clean_job_logs(&state.pool)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    tracing::info!(deleted, "job log cleaned");

    Ok(Json(ApiResponse {
        data: serde_json::json!({ "deleted": deleted }),
        meta: ResponseMeta::new(req_id.0),
    }))
}
