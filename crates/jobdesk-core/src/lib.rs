//! Shared configuration and job domain types for the jobdesk workspace.

mod app_config;
mod config;
pub mod jobs;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use jobs::{
    truncate_chars, ConcurrencyPolicy, ExecutionStatus, JobDefinition, JobExecutionRecord,
    JobStatus, MisfirePolicy, CRON_EXPRESSION_MAX_CHARS, DEFAULT_JOB_GROUP,
    EXCEPTION_INFO_MAX_CHARS, FAILURE_MESSAGE, INVOKE_TARGET_MAX_CHARS, JOB_MESSAGE_MAX_CHARS,
    JOB_NAME_MAX_CHARS, REMARK_MAX_CHARS, SUCCESS_MESSAGE,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid {field} code: {code:?}")]
    InvalidCode { field: &'static str, code: String },
}
