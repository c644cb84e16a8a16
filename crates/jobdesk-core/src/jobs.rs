//! Job definitions, policy codes and execution records.
//!
//! Policy enums are stored and exchanged as the single-character codes used by
//! the `sys_job` / `sys_job_log` tables and the admin UI (`"0"`, `"1"`, ...).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Group assigned to jobs created without an explicit group.
pub const DEFAULT_JOB_GROUP: &str = "DEFAULT";

/// Column limit for `sys_job.job_name` and `job_group`.
pub const JOB_NAME_MAX_CHARS: usize = 64;

/// Column limit for `invoke_target` in both tables.
pub const INVOKE_TARGET_MAX_CHARS: usize = 500;

/// Column limit for `sys_job.cron_expression`.
pub const CRON_EXPRESSION_MAX_CHARS: usize = 255;

/// Column limit for `sys_job.remark`.
pub const REMARK_MAX_CHARS: usize = 500;

/// Column limit for `sys_job_log.job_message`.
pub const JOB_MESSAGE_MAX_CHARS: usize = 500;

/// Column limit for `sys_job_log.exception_info`.
pub const EXCEPTION_INFO_MAX_CHARS: usize = 2000;

/// Message recorded when a task succeeds without returning any text.
pub const SUCCESS_MESSAGE: &str = "executed successfully";

/// Message recorded for every failed execution.
pub const FAILURE_MESSAGE: &str = "execution failed";

macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $code:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $code)] $variant ),+
        }

        impl $name {
            /// The storage/wire code for this value.
            #[must_use]
            pub fn code(self) -> &'static str {
                match self {
                    $( Self::$variant => $code ),+
                }
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $( $code => Ok(Self::$variant), )+
                    other => Err(CoreError::InvalidCode {
                        field: $field,
                        code: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.code())
            }
        }
    };
}

coded_enum! {
    /// What to do when a fire time passes before the engine could run it.
    #[derive(Default)]
    MisfirePolicy, "misfire_policy" {
        FireImmediately => "1",
        FireOnce => "2",
        #[default]
        Discard => "3",
    }
}

coded_enum! {
    /// Whether overlapping runs of the same job may execute simultaneously.
    ConcurrencyPolicy, "concurrent" {
        Allow => "0",
        Forbid => "1",
    }
}

coded_enum! {
    JobStatus, "status" {
        Enabled => "0",
        Disabled => "1",
    }
}

coded_enum! {
    ExecutionStatus, "execution status" {
        Success => "0",
        Failure => "1",
    }
}

impl MisfirePolicy {
    /// Parses a stored misfire code, treating anything unrecognised as
    /// [`MisfirePolicy::Discard`].
    #[must_use]
    pub fn from_code_lenient(code: &str) -> Self {
        code.parse().unwrap_or_default()
    }
}

/// A persisted job definition as consumed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_id: i64,
    pub job_name: String,
    pub job_group: String,
    pub invoke_target: String,
    pub cron_expression: String,
    pub misfire_policy: MisfirePolicy,
    pub concurrent: ConcurrencyPolicy,
    pub status: JobStatus,
}

impl JobDefinition {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.status == JobStatus::Enabled
    }
}

/// The outcome of one job execution, appended to `sys_job_log`.
///
/// Name, group and target are copied at execution time so the record stays
/// meaningful after the job definition changes or is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    pub job_name: String,
    pub job_group: String,
    pub invoke_target: String,
    pub status: ExecutionStatus,
    pub message: String,
    pub exception_info: String,
    pub create_time: DateTime<Utc>,
}

impl JobExecutionRecord {
    /// Builds a success record. An empty `message` becomes [`SUCCESS_MESSAGE`].
    #[must_use]
    pub fn success(
        job_name: &str,
        job_group: &str,
        invoke_target: &str,
        message: &str,
        create_time: DateTime<Utc>,
    ) -> Self {
        let message = if message.is_empty() {
            SUCCESS_MESSAGE
        } else {
            message
        };
        Self {
            job_name: job_name.to_string(),
            job_group: job_group.to_string(),
            invoke_target: invoke_target.to_string(),
            status: ExecutionStatus::Success,
            message: message.to_string(),
            exception_info: String::new(),
            create_time,
        }
        .bounded()
    }

    /// Builds a failure record carrying `exception_info` as the failure detail.
    #[must_use]
    pub fn failure(
        job_name: &str,
        job_group: &str,
        invoke_target: &str,
        exception_info: &str,
        create_time: DateTime<Utc>,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            job_group: job_group.to_string(),
            invoke_target: invoke_target.to_string(),
            status: ExecutionStatus::Failure,
            message: FAILURE_MESSAGE.to_string(),
            exception_info: exception_info.to_string(),
            create_time,
        }
        .bounded()
    }

    /// Truncates `message` and `exception_info` to their column limits.
    #[must_use]
    pub fn bounded(mut self) -> Self {
        self.message = truncate_chars(&self.message, JOB_MESSAGE_MAX_CHARS);
        self.exception_info = truncate_chars(&self.exception_info, EXCEPTION_INFO_MAX_CHARS);
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Returns at most `max` characters of `s`, never splitting a code point.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
