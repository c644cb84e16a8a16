//! Postgres-backed job source and log sink.

use async_trait::async_trait;
use jobdesk_core::{JobDefinition, JobExecutionRecord};
use jobdesk_db::DbError;
use sqlx::PgPool;

use crate::lifecycle::JobSource;
use crate::run_log::JobLogSink;

#[async_trait]
impl JobSource for PgPool {
    async fn enabled_jobs(&self) -> Result<Vec<JobDefinition>, DbError> {
        let rows = jobdesk_db::list_enabled_jobs(self).await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            match row.to_definition() {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::error!(
                    job_id = row.job_id,
                    error = %e,
                    "scheduler: skipping unreadable job row"
                ),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobLogSink for PgPool {
    async fn append(&self, record: &JobExecutionRecord) -> Result<(), DbError> {
        jobdesk_db::insert_job_log(self, record).await?;
        Ok(())
    }
}
