//! Cron-driven job scheduler.
//!
//! Job definitions name a registered task through an invoke target string
//! (`module.function(args)`) and a Quartz-style cron expression. The engine
//! keeps one timer per job, applies misfire and concurrency policies, and
//! hands every execution record to an asynchronous log writer.

pub mod engine;
pub mod error;
pub mod executor;
pub mod guard;
pub mod lifecycle;
pub mod registry;
pub mod run_log;
pub mod target;
pub mod tasks;
pub mod trigger;

mod store;

pub use engine::{
    decide_fire, entry_key, misfire_grace, remaining_wait, EntrySummary, FireDecision,
    SchedulerEngine,
};
pub use error::{SchedulerError, TaskResolutionError, ValidationError};
pub use executor::{ExecutionOutcome, JobExecutor, JobParams};
pub use guard::{RunGuard, RunningJobs};
pub use lifecycle::{
    add_job_to_scheduler, drain_scheduler, get_next_fire_time, init_scheduler, load_enabled_jobs,
    remove_job_from_scheduler, run_job_once, shutdown_scheduler, start_engine, JobSource,
    LoadReport,
};
pub use registry::{TaskHandler, TaskRegistry, TaskResult, TaskSpec};
pub use run_log::{JobLogSink, MemoryLogSink, RunLogWriter};
pub use target::{parse_invoke_target, ArgValue, InvokeTarget};
pub use trigger::{translate, CronTrigger};
