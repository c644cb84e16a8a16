//! Single execution path shared by scheduled fires and run-once requests.

use std::sync::Arc;

use chrono::Utc;
use jobdesk_core::{ConcurrencyPolicy, JobDefinition, JobExecutionRecord};

use crate::guard::RunningJobs;
use crate::registry::TaskRegistry;
use crate::run_log::RunLogWriter;
use crate::target::parse_invoke_target;

/// The parameters bound to a scheduled entry at `add` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParams {
    pub job_id: i64,
    pub job_name: String,
    pub job_group: String,
    pub invoke_target: String,
    pub concurrent: ConcurrencyPolicy,
}

impl From<&JobDefinition> for JobParams {
    fn from(job: &JobDefinition) -> Self {
        Self {
            job_id: job.job_id,
            job_name: job.job_name.clone(),
            job_group: job.job_group.clone(),
            invoke_target: job.invoke_target.clone(),
            concurrent: job.concurrent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// A forbid-concurrent job was already running; nothing was recorded.
    Skipped,
    /// The task ran and this record was handed to the log writer.
    Completed(JobExecutionRecord),
}

impl ExecutionOutcome {
    #[must_use]
    pub fn record(&self) -> Option<&JobExecutionRecord> {
        match self {
            Self::Skipped => None,
            Self::Completed(record) => Some(record),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobExecutor {
    registry: Arc<TaskRegistry>,
    running: RunningJobs,
    log: RunLogWriter,
}

impl JobExecutor {
    #[must_use]
    pub fn new(registry: Arc<TaskRegistry>, log: RunLogWriter) -> Self {
        Self {
            registry,
            running: RunningJobs::new(),
            log,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    #[must_use]
    pub fn log_writer(&self) -> &RunLogWriter {
        &self.log
    }

    #[must_use]
    pub fn running(&self) -> &RunningJobs {
        &self.running
    }

    /// Runs one execution of `params`.
    ///
    /// Forbid-concurrent jobs that are already running are skipped without a
    /// record. Every other call produces exactly one record, whether the
    /// target fails to parse, fails to resolve, returns an error, panics, or
    /// succeeds.
    pub async fn execute(&self, params: &JobParams) -> ExecutionOutcome {
        let _guard = match params.concurrent {
            ConcurrencyPolicy::Forbid => {
                if let Some(guard) = self.running.try_acquire(params.job_id) {
                    Some(guard)
                } else {
                    tracing::warn!(
                        job_id = params.job_id,
                        job_name = %params.job_name,
                        "scheduler: job is still running; skipping overlapping execution"
                    );
                    return ExecutionOutcome::Skipped;
                }
            }
            ConcurrencyPolicy::Allow => None,
        };

        tracing::info!(
            job_id = params.job_id,
            invoke_target = %params.invoke_target,
            "scheduler: executing job"
        );

        let result = match parse_invoke_target(&params.invoke_target) {
            Ok(target) => self.registry.invoke(&target).await,
            Err(e) => Err(e.into()),
        };

        let record = match result {
            Ok(message) => JobExecutionRecord::success(
                &params.job_name,
                &params.job_group,
                &params.invoke_target,
                &message,
                Utc::now(),
            ),
            Err(e) => {
                tracing::error!(
                    job_id = params.job_id,
                    error = %format!("{e:#}"),
                    "scheduler: job execution failed"
                );
                JobExecutionRecord::failure(
                    &params.job_name,
                    &params.job_group,
                    &params.invoke_target,
                    &format!("{e:#}"),
                    Utc::now(),
                )
            }
        };

        self.log.submit(record.clone());
        ExecutionOutcome::Completed(record)
    }
}
