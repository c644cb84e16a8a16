//! Database operations for `sys_job_log`.

use chrono::{DateTime, Utc};
use jobdesk_core::{ExecutionStatus, JobExecutionRecord};
use sqlx::PgPool;

use crate::{DbError, Page, Paged};

/// A row from the `sys_job_log` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobLogRow {
    pub job_log_id: i64,
    pub job_name: String,
    pub job_group: String,
    pub invoke_target: String,
    pub job_message: String,
    pub status: String,
    pub exception_info: String,
    pub create_time: DateTime<Utc>,
}

/// Filters for [`list_job_logs`]. The time bounds are inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobLogFilter<'a> {
    pub job_name: Option<&'a str>,
    pub job_group: Option<&'a str>,
    pub status: Option<ExecutionStatus>,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Appends one execution record in its own transaction and returns its id.
///
/// Text fields are truncated to the column limits before the insert.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the transaction cannot be opened, the insert
/// fails, or the commit fails.
pub async fn insert_job_log(pool: &PgPool, record: &JobExecutionRecord) -> Result<i64, DbError> {
    let record = record.clone().bounded();
    let mut tx = pool.begin().await?;

    let job_log_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO sys_job_log \
             (job_name, job_group, invoke_target, job_message, status, exception_info, create_time) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING job_log_id",
    )
    .bind(&record.job_name)
    .bind(&record.job_group)
    .bind(&record.invoke_target)
    .bind(&record.message)
    .bind(record.status.code())
    .bind(&record.exception_info)
    .bind(record.create_time)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(job_log_id)
}

/// Lists execution records matching `filter`, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if either query fails.
pub async fn list_job_logs(
    pool: &PgPool,
    filter: JobLogFilter<'_>,
    page: Page,
) -> Result<Paged<JobLogRow>, DbError> {
    let status = filter.status.map(ExecutionStatus::code);
    let name_pattern = filter.job_name.map(crate::contains_pattern);

    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sys_job_log \
         WHERE ($1::TEXT IS NULL OR job_name ILIKE $1 ESCAPE '\\') \
           AND ($2::TEXT IS NULL OR job_group = $2) \
           AND ($3::TEXT IS NULL OR status = $3) \
           AND ($4::timestamptz IS NULL OR create_time >= $4) \
           AND ($5::timestamptz IS NULL OR create_time <= $5)",
    )
    .bind(name_pattern.as_deref())
    .bind(filter.job_group)
    .bind(status)
    .bind(filter.begin_time)
    .bind(filter.end_time)
    .fetch_one(pool)
    .await?;

    let items = sqlx::query_as::<_, JobLogRow>(
        "SELECT job_log_id, job_name, job_group, invoke_target, job_message, \
                status, exception_info, create_time \
         FROM sys_job_log \
         WHERE ($1::TEXT IS NULL OR job_name ILIKE $1 ESCAPE '\\') \
           AND ($2::TEXT IS NULL OR job_group = $2) \
           AND ($3::TEXT IS NULL OR status = $3) \
           AND ($4::timestamptz IS NULL OR create_time >= $4) \
           AND ($5::timestamptz IS NULL OR create_time <= $5) \
         ORDER BY job_log_id DESC \
         LIMIT $6 OFFSET $7",
    )
    .bind(name_pattern.as_deref())
    .bind(filter.job_group)
    .bind(status)
    .bind(filter.begin_time)
    .bind(filter.end_time)
    .bind(page.size)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(Paged { items, total })
}

/// Deletes the given execution records.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_job_logs(pool: &PgPool, job_log_ids: &[i64]) -> Result<u64, DbError> {
    if job_log_ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query("DELETE FROM sys_job_log WHERE job_log_id = ANY($1)")
        .bind(job_log_ids)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Removes every execution record.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn clean_job_logs(pool: &PgPool) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM sys_job_log")
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
