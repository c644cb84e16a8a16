//! Database operations for `sys_job`.

use chrono::{DateTime, Utc};
use jobdesk_core::{ConcurrencyPolicy, JobDefinition, JobStatus, MisfirePolicy};
use sqlx::PgPool;

use crate::{DbError, Page, Paged};

// ---------------------------------------------------------------------------
// Row and input types
// ---------------------------------------------------------------------------

/// A row from the `sys_job` table. Policy columns hold their raw codes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
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
}

impl JobRow {
    /// Converts the row into the scheduler's view of a job.
    ///
    /// Unknown misfire codes load as discard; unknown `status` or `concurrent`
    /// codes are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] if `status` or `concurrent` hold an
    /// unrecognised code.
    pub fn to_definition(&self) -> Result<JobDefinition, DbError> {
        let invalid = |source| DbError::InvalidRow {
            table: "sys_job",
            source,
        };
        Ok(JobDefinition {
            job_id: self.job_id,
            job_name: self.job_name.clone(),
            job_group: self.job_group.clone(),
            invoke_target: self.invoke_target.clone(),
            cron_expression: self.cron_expression.clone(),
            misfire_policy: MisfirePolicy::from_code_lenient(&self.misfire_policy),
            concurrent: self.concurrent.parse::<ConcurrencyPolicy>().map_err(invalid)?,
            status: self.status.parse::<JobStatus>().map_err(invalid)?,
        })
    }
}

/// Fields for a new `sys_job` row.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub job_name: &'a str,
    pub job_group: &'a str,
    pub invoke_target: &'a str,
    pub cron_expression: &'a str,
    pub misfire_policy: MisfirePolicy,
    pub concurrent: ConcurrencyPolicy,
    pub status: JobStatus,
    pub remark: &'a str,
}

/// Partial update for a `sys_job` row; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct JobPatch<'a> {
    pub job_name: Option<&'a str>,
    pub job_group: Option<&'a str>,
    pub invoke_target: Option<&'a str>,
    pub cron_expression: Option<&'a str>,
    pub misfire_policy: Option<MisfirePolicy>,
    pub concurrent: Option<ConcurrencyPolicy>,
    pub status: Option<JobStatus>,
    pub remark: Option<&'a str>,
}

/// Filters for [`list_jobs`]. `job_name` matches as a case-insensitive substring.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobFilter<'a> {
    pub job_name: Option<&'a str>,
    pub job_group: Option<&'a str>,
    pub status: Option<JobStatus>,
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Fetches one job by id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_job(pool: &PgPool, job_id: i64) -> Result<Option<JobRow>, DbError> {
    let row = sqlx::query_as::<_, JobRow>(
        "SELECT job_id, job_name, job_group, invoke_target, cron_expression, \
                misfire_policy, concurrent, status, create_by, create_time, \
                update_by, update_time, remark \
         FROM sys_job \
         WHERE job_id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Lists jobs matching `filter`, ordered by id, one page at a time.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if either query fails.
pub async fn list_jobs(
    pool: &PgPool,
    filter: JobFilter<'_>,
    page: Page,
) -> Result<Paged<JobRow>, DbError> {
    let status = filter.status.map(JobStatus::code);
    let name_pattern = filter.job_name.map(crate::contains_pattern);

    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sys_job \
         WHERE ($1::TEXT IS NULL OR job_name ILIKE $1 ESCAPE '\\') \
           AND ($2::TEXT IS NULL OR job_group = $2) \
           AND ($3::TEXT IS NULL OR status = $3)",
    )
    .bind(name_pattern.as_deref())
    .bind(filter.job_group)
    .bind(status)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as::<_, JobRow>(
        "SELECT job_id, job_name, job_group, invoke_target, cron_expression, \
                misfire_policy, concurrent, status, create_by, create_time, \
                update_by, update_time, remark \
         FROM sys_job \
         WHERE ($1::TEXT IS NULL OR job_name ILIKE $1 ESCAPE '\\') \
           AND ($2::TEXT IS NULL OR job_group = $2) \
           AND ($3::TEXT IS NULL OR status = $3) \
         ORDER BY job_id \
         LIMIT $4 OFFSET $5",
    )
    .bind(name_pattern.as_deref())
    .bind(filter.job_group)
    .bind(status)
    .bind(page.size)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(Paged { items, total })
}

/// Returns every job whose status is enabled.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_enabled_jobs(pool: &PgPool) -> Result<Vec<JobRow>, DbError> {
    let rows = sqlx::query_as::<_, JobRow>(
        "SELECT job_id, job_name, job_group, invoke_target, cron_expression, \
                misfire_policy, concurrent, status, create_by, create_time, \
                update_by, update_time, remark \
         FROM sys_job \
         WHERE status = $1 \
         ORDER BY job_id",
    )
    .bind(JobStatus::Enabled.code())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Inserts a job and returns the stored row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_job(
    pool: &PgPool,
    job: &NewJob<'_>,
    create_by: &str,
) -> Result<JobRow, DbError> {
    let row = sqlx::query_as::<_, JobRow>(
        "INSERT INTO sys_job \
             (job_name, job_group, invoke_target, cron_expression, misfire_policy, \
              concurrent, status, remark, create_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING job_id, job_name, job_group, invoke_target, cron_expression, \
                   misfire_policy, concurrent, status, create_by, create_time, \
                   update_by, update_time, remark",
    )
    .bind(job.job_name)
    .bind(job.job_group)
    .bind(job.invoke_target)
    .bind(job.cron_expression)
    .bind(job.misfire_policy.code())
    .bind(job.concurrent.code())
    .bind(job.status.code())
    .bind(job.remark)
    .bind(create_by)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Applies `patch` to a job and returns the updated row, or `None` if the job
/// does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn update_job(
    pool: &PgPool,
    job_id: i64,
    patch: &JobPatch<'_>,
    update_by: &str,
) -> Result<Option<JobRow>, DbError> {
    let row = sqlx::query_as::<_, JobRow>(
        "UPDATE sys_job SET \
             job_name = COALESCE($2, job_name), \
             job_group = COALESCE($3, job_group), \
             invoke_target = COALESCE($4, invoke_target), \
             cron_expression = COALESCE($5, cron_expression), \
             misfire_policy = COALESCE($6, misfire_policy), \
             concurrent = COALESCE($7, concurrent), \
             status = COALESCE($8, status), \
             remark = COALESCE($9, remark), \
             update_by = $10, \
             update_time = NOW() \
         WHERE job_id = $1 \
         RETURNING job_id, job_name, job_group, invoke_target, cron_expression, \
                   misfire_policy, concurrent, status, create_by, create_time, \
                   update_by, update_time, remark",
    )
    .bind(job_id)
    .bind(patch.job_name)
    .bind(patch.job_group)
    .bind(patch.invoke_target)
    .bind(patch.cron_expression)
    .bind(patch.misfire_policy.map(MisfirePolicy::code))
    .bind(patch.concurrent.map(ConcurrencyPolicy::code))
    .bind(patch.status.map(JobStatus::code))
    .bind(patch.remark)
    .bind(update_by)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Sets only the status column of a job.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_job_status(
    pool: &PgPool,
    job_id: i64,
    status: JobStatus,
    update_by: &str,
) -> Result<Option<JobRow>, DbError> {
    let patch = JobPatch {
        status: Some(status),
        ..JobPatch::default()
    };
    update_job(pool, job_id, &patch, update_by).await
}

/// Deletes the given jobs and returns the number of rows removed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_jobs(pool: &PgPool, job_ids: &[i64]) -> Result<u64, DbError> {
    if job_ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query("DELETE FROM sys_job WHERE job_id = ANY($1)")
        .bind(job_ids)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
