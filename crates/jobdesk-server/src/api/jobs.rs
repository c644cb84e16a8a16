//! Job definition handlers. Every write is persisted first and then mirrored
//! into the live scheduler.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use jobdesk_core::{
    ConcurrencyPolicy, JobStatus, MisfirePolicy, CRON_EXPRESSION_MAX_CHARS, DEFAULT_JOB_GROUP,
    INVOKE_TARGET_MAX_CHARS, JOB_NAME_MAX_CHARS, REMARK_MAX_CHARS,
};
use jobdesk_db::{JobFilter, JobPatch, JobRow, NewJob};
use jobdesk_scheduler::{
    add_job_to_scheduler, get_next_fire_time, parse_invoke_target, remove_job_from_scheduler,
    run_job_once, translate, SchedulerEngine,
};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{
    map_db_error, map_scheduler_error, normalize_page, parse_id, parse_ids, parse_optional_code,
    ApiError, ApiResponse, AppState, CodeValue, PageData, ResponseMeta,
};

/// Recorded as `create_by` / `update_by` for API writes.
const API_ACTOR: &str = "api";

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct JobListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub job_name: Option<String>,
    pub job_group: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateJobRequest {
    pub job_name: String,
    pub job_group: Option<String>,
    pub invoke_target: String,
    pub cron_expression: String,
    pub misfire_policy: Option<CodeValue>,
    pub concurrent: Option<CodeValue>,
    pub status: Option<CodeValue>,
    pub remark: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UpdateJobRequest {
    pub job_name: Option<String>,
    pub job_group: Option<String>,
    pub invoke_target: Option<String>,
    pub cron_expression: Option<String>,
    pub misfire_policy: Option<CodeValue>,
    pub concurrent: Option<CodeValue>,
    pub status: Option<CodeValue>,
    pub remark: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChangeStatusRequest {
    pub status: CodeValue,
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct JobItem {
    pub job_id: i64,
    pub job_name: String,
    pub job_group: String,
    pub invoke_target: String,
    pub cron_expression: String,
    pub misfire_policy: String,
    pub concurrent: String,
    pub status: String,
    pub create_by: String,
    pub create_time: DateTime<Utc>,
    pub update_by: String,
    pub update_time: Option<DateTime<Utc>>,
    pub remark: String,
    pub next_fire_time: Option<DateTime<Utc>>,
}

impl JobItem {
    fn from_row(row: JobRow, scheduler: &SchedulerEngine) -> Self {
        Self {
            next_fire_time: get_next_fire_time(scheduler, row.job_id),
            job_id: row.job_id,
            job_name: row.job_name,
            job_group: row.job_group,
            invoke_target: row.invoke_target,
            cron_expression: row.cron_expression,
            misfire_policy: row.misfire_policy,
            concurrent: row.concurrent,
            status: row.status,
            create_by: row.create_by,
            create_time: row.create_time,
            update_by: row.update_by,
            update_time: row.update_time,
            remark: row.remark,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_name(req_id: &str, field: &str, value: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > JOB_NAME_MAX_CHARS {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            format!("{field} must be 1-{JOB_NAME_MAX_CHARS} characters"),
        ));
    }
    Ok(trimmed.to_owned())
}

/// Rejects values that would not fit their column.
fn validate_len(req_id: &str, field: &str, value: &str, max: usize) -> Result<(), ApiError> {
    if value.chars().count() > max {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            format!("{field} must be at most {max} characters"),
        ));
    }
    Ok(())
}

fn validate_cron(req_id: &str, expression: &str) -> Result<(), ApiError> {
    validate_len(req_id, "cron_expression", expression, CRON_EXPRESSION_MAX_CHARS)?;
    translate(expression)
        .map(|_| ())
        .map_err(|e| ApiError::new(req_id, "validation_error", e.to_string()))
}

fn validate_target(req_id: &str, target: &str) -> Result<(), ApiError> {
    validate_len(req_id, "invoke_target", target, INVOKE_TARGET_MAX_CHARS)?;
    parse_invoke_target(target)
        .map(|_| ())
        .map_err(|e| ApiError::new(req_id, "validation_error", e.to_string()))
}

/// Brings the live entry for `row` in line with the stored definition.
fn sync_schedule(req_id: &str, scheduler: &SchedulerEngine, row: &JobRow) -> Result<(), ApiError> {
    let job = row
        .to_definition()
        .map_err(|e| map_db_error(req_id.to_owned(), &e))?;

    if job.is_enabled() {
        add_job_to_scheduler(scheduler, &job).map_err(|e| map_scheduler_error(req_id, &e))
    } else {
        remove_job_from_scheduler(scheduler, job.job_id);
        Ok(())
    }
}

async fn fetch_job(state: &AppState, req_id: &str, job_id: i64) -> Result<JobRow, ApiError> {
    jobdesk_db::get_job(&state.pool, job_id)
        .await
        .map_err(|e| map_db_error(req_id.to_owned(), &e))?
        .ok_or_else(|| ApiError::new(req_id, "not_found", format!("job {job_id} not found")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
pub(crate) async fn list_jobs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<ApiResponse<PageData<JobItem>>>, ApiError> {
    let rid = &req_id.0;
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(|e| ApiError::new(rid, "validation_error", format!("status: {e}")))?;

    let page = normalize_page(query.page, query.page_size);
    let filter = JobFilter {
        job_name: query.job_name.as_deref().filter(|s| !s.is_empty()),
        job_group: query.job_group.as_deref().filter(|s| !s.is_empty()),
        status,
    };

    let paged = jobdesk_db::list_jobs(&state.pool, filter, page)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    let items = paged
        .items
        .into_iter()
        .map(|row| JobItem::from_row(row, &state.scheduler))
        .collect();

    Ok(Json(ApiResponse {
        data: PageData {
            items,
            total: paged.total,
            page: page.number,
            page_size: page.size,
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// GET /api/v1/jobs/{job_id}
pub(crate) async fn get_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<JobItem>>, ApiError> {
    let rid = &req_id.0;
    let job_id = parse_id(rid, &job_id)?;
    let row = fetch_job(&state, rid, job_id).await?;

    Ok(Json(ApiResponse {
        data: JobItem::from_row(row, &state.scheduler),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// POST /api/v1/jobs
pub(crate) async fn create_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<ApiResponse<JobItem>>), ApiError> {
    let rid = &req_id.0;

    let job_name = validate_name(rid, "job_name", &body.job_name)?;
    let job_group = match body.job_group.as_deref() {
        Some(group) => validate_name(rid, "job_group", group)?,
        None => DEFAULT_JOB_GROUP.to_owned(),
    };
    let invoke_target = body.invoke_target.trim();
    let cron_expression = body.cron_expression.trim();
    validate_cron(rid, cron_expression)?;
    validate_target(rid, invoke_target)?;
    let remark = body.remark.as_deref().unwrap_or_default();
    validate_len(rid, "remark", remark, REMARK_MAX_CHARS)?;

    let misfire_policy: MisfirePolicy =
        parse_optional_code(rid, "misfire_policy", body.misfire_policy.as_ref())?
            .unwrap_or_default();
    let concurrent = parse_optional_code(rid, "concurrent", body.concurrent.as_ref())?
        .unwrap_or(ConcurrencyPolicy::Forbid);
    let status = parse_optional_code(rid, "status", body.status.as_ref())?
        .unwrap_or(JobStatus::Enabled);

    let new_job = NewJob {
        job_name: &job_name,
        job_group: &job_group,
        invoke_target,
        cron_expression,
        misfire_policy,
        concurrent,
        status,
        remark,
    };

    let row = jobdesk_db::create_job(&state.pool, &new_job, API_ACTOR)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    sync_schedule(rid, &state.scheduler, &row)?;
    tracing::info!(job_id = row.job_id, job_name = %row.job_name, "job created");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            data: JobItem::from_row(row, &state.scheduler),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

/// PUT /api/v1/jobs/{job_id}: sparse update; absent fields keep their value.
pub(crate) async fn update_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(job_id): Path<String>,
    Json(body): Json<UpdateJobRequest>,
) -> Result<Json<ApiResponse<JobItem>>, ApiError> {
    let rid = &req_id.0;
    let job_id = parse_id(rid, &job_id)?;

    let job_name = body
        .job_name
        .as_deref()
        .map(|n| validate_name(rid, "job_name", n))
        .transpose()?;
    let job_group = body
        .job_group
        .as_deref()
        .map(|g| validate_name(rid, "job_group", g))
        .transpose()?;
    let invoke_target = body.invoke_target.as_deref().map(str::trim);
    let cron_expression = body.cron_expression.as_deref().map(str::trim);
    if let Some(expression) = cron_expression {
        validate_cron(rid, expression)?;
    }
    if let Some(target) = invoke_target {
        validate_target(rid, target)?;
    }
    if let Some(remark) = body.remark.as_deref() {
        validate_len(rid, "remark", remark, REMARK_MAX_CHARS)?;
    }

    let patch = JobPatch {
        job_name: job_name.as_deref(),
        job_group: job_group.as_deref(),
        invoke_target,
        cron_expression,
        misfire_policy: parse_optional_code(rid, "misfire_policy", body.misfire_policy.as_ref())?,
        concurrent: parse_optional_code(rid, "concurrent", body.concurrent.as_ref())?,
        status: parse_optional_code(rid, "status", body.status.as_ref())?,
        remark: body.remark.as_deref(),
    };

    let row = jobdesk_db::update_job(&state.pool, job_id, &patch, API_ACTOR)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .ok_or_else(|| ApiError::new(rid, "not_found", format!("job {job_id} not found")))?;

    remove_job_from_scheduler(&state.scheduler, job_id);
    sync_schedule(rid, &state.scheduler, &row)?;

    Ok(Json(ApiResponse {
        data: JobItem::from_row(row, &state.scheduler),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// PUT /api/v1/jobs/{job_id}/status
pub(crate) async fn change_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(job_id): Path<String>,
    Json(body): Json<ChangeStatusRequest>,
) -> Result<Json<ApiResponse<JobItem>>, ApiError> {
    let rid = &req_id.0;
    let job_id = parse_id(rid, &job_id)?;
    let status: JobStatus = body.status.parse(rid, "status")?;

    let row = jobdesk_db::set_job_status(&state.pool, job_id, status, API_ACTOR)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .ok_or_else(|| ApiError::new(rid, "not_found", format!("job {job_id} not found")))?;

    sync_schedule(rid, &state.scheduler, &row)?;

    Ok(Json(ApiResponse {
        data: JobItem::from_row(row, &state.scheduler),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// POST /api/v1/jobs/{job_id}/run: responds once the run is dispatched.
pub(crate) async fn run_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let rid = &req_id.0;
    let job_id = parse_id(rid, &job_id)?;
    let job = fetch_job(&state, rid, job_id)
        .await?
        .to_definition()
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    // Detached; the outcome lands in the job log.
    drop(run_job_once(&state.scheduler, &job).map_err(|e| map_scheduler_error(rid, &e))?);

    Ok(Json(ApiResponse {
        data: serde_json::json!({ "dispatched": true }),
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// DELETE /api/v1/jobs/{ids}: comma-separated ids.
pub(crate) async fn delete_jobs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(ids): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let rid = &req_id.0;
    let ids = parse_ids(rid, &ids)?;

    for id in &ids {
        remove_job_from_scheduler(&state.scheduler, *id);
    }

    let deleted = jobdesk_db::delete_jobs(&state.pool, &ids)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: serde_json::json!({ "deleted": deleted }),
        meta: ResponseMeta::new(req_id.0),
    }))
}
