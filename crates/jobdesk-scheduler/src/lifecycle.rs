//! Startup and shutdown of the scheduler.
//!
//! Startup builds the log writer, executor and engine, then schedules every
//! enabled job from a [`JobSource`]. One bad job does not stop the others
//! from loading.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobdesk_core::JobDefinition;
use jobdesk_db::DbError;
use tokio::task::JoinHandle;

use crate::engine::SchedulerEngine;
use crate::error::SchedulerError;
use crate::executor::{ExecutionOutcome, JobExecutor};
use crate::registry::TaskRegistry;
use crate::run_log::{JobLogSink, RunLogWriter};

/// Where enabled job definitions come from at startup.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn enabled_jobs(&self) -> Result<Vec<JobDefinition>, DbError>;
}

/// Outcome of a bulk load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub scheduled: Vec<i64>,
    pub failed: Vec<i64>,
}

/// Starts an empty engine whose executions are logged to `sink`.
///
/// # Errors
///
/// Returns [`SchedulerError::NoRuntime`] outside a tokio runtime.
pub fn start_engine(
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn JobLogSink>,
) -> Result<SchedulerEngine, SchedulerError> {
    tokio::runtime::Handle::try_current()?;
    let (log, log_task) = RunLogWriter::spawn(sink);
    let engine = SchedulerEngine::start(JobExecutor::new(registry, log), log_task)?;
    tracing::info!("scheduler: started");
    Ok(engine)
}

/// Schedules every enabled job from `source`.
///
/// Jobs that fail validation are logged and reported in
/// [`LoadReport::failed`]; the rest are still scheduled.
///
/// # Errors
///
/// Returns [`SchedulerError::Source`] if the definitions cannot be read.
pub async fn load_enabled_jobs(
    engine: &SchedulerEngine,
    source: &dyn JobSource,
) -> Result<LoadReport, SchedulerError> {
    let jobs = source.enabled_jobs().await?;
    let mut report = LoadReport::default();

    for job in jobs.iter().filter(|job| job.is_enabled()) {
        match engine.add(job) {
            Ok(()) => report.scheduled.push(job.job_id),
            Err(e) => {
                tracing::error!(
                    job_id = job.job_id,
                    job_name = %job.job_name,
                    error = %e,
                    "scheduler: failed to schedule job at startup"
                );
                report.failed.push(job.job_id);
            }
        }
    }

    tracing::info!(
        scheduled = report.scheduled.len(),
        failed = report.failed.len(),
        "scheduler: loaded enabled jobs"
    );
    Ok(report)
}

/// Starts the engine and loads every enabled job.
///
/// # Errors
///
/// Returns an error if the engine cannot start or the definitions cannot be
/// read. Individual invalid jobs are not errors.
pub async fn init_scheduler(
    source: &dyn JobSource,
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn JobLogSink>,
) -> Result<(SchedulerEngine, LoadReport), SchedulerError> {
    let engine = start_engine(registry, sink)?;
    let report = load_enabled_jobs(&engine, source).await?;
    Ok((engine, report))
}

/// Stops scheduling. Executions already running finish on their own.
pub fn shutdown_scheduler(engine: &SchedulerEngine) {
    engine.shutdown();
}

/// Stops scheduling and waits up to `timeout` for running executions and
/// their log records. Returns whether everything finished in time.
pub async fn drain_scheduler(engine: &SchedulerEngine, timeout: Duration) -> bool {
    engine.drain(timeout).await
}

// ---------------------------------------------------------------------------
// Administrative entry points
// ---------------------------------------------------------------------------

/// Upserts `job` into the live schedule.
///
/// # Errors
///
/// Returns [`SchedulerError::Validation`] for a malformed cron expression or
/// invoke target, and [`SchedulerError::NotRunning`] after shutdown.
pub fn add_job_to_scheduler(
    engine: &SchedulerEngine,
    job: &JobDefinition,
) -> Result<(), SchedulerError> {
    engine.add(job)
}

/// Removes a job from the live schedule; a job that is not scheduled is
/// ignored.
pub fn remove_job_from_scheduler(engine: &SchedulerEngine, job_id: i64) {
    if !engine.remove(job_id) {
        tracing::debug!(job_id, "scheduler: remove requested for unscheduled job");
    }
}

/// Dispatches one out-of-band execution of `job`.
///
/// # Errors
///
/// Returns [`SchedulerError::Validation`] for a malformed invoke target and
/// [`SchedulerError::NotRunning`] after shutdown.
pub fn run_job_once(
    engine: &SchedulerEngine,
    job: &JobDefinition,
) -> Result<JoinHandle<ExecutionOutcome>, SchedulerError> {
    engine.run_once(job)
}

#[must_use]
pub fn get_next_fire_time(engine: &SchedulerEngine, job_id: i64) -> Option<DateTime<Utc>> {
    engine.next_fire_time(job_id)
}

/// A fixed list of definitions, for tests and one-off tools.
#[async_trait]
impl JobSource for Vec<JobDefinition> {
    async fn enabled_jobs(&self) -> Result<Vec<JobDefinition>, DbError> {
        Ok(self.iter().filter(|job| job.is_enabled()).cloned().collect())
    }
}
