use thiserror::Error;

/// A cron expression or invoke target that cannot be scheduled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid cron expression {expression:?}: {reason}")]
    Cron { expression: String, reason: String },

    #[error("invalid invoke target {target:?}: {reason}")]
    InvokeTarget { target: String, reason: String },
}

impl ValidationError {
    pub(crate) fn cron(expression: &str, reason: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn target(target: &str, reason: impl Into<String>) -> Self {
        Self::InvokeTarget {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}

/// A parsed target that does not name a registered task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskResolutionError {
    #[error("unknown task module {0:?}")]
    UnknownModule(String),

    #[error("unknown task function {module}.{function}")]
    UnknownFunction { module: String, function: String },

    #[error("{module}.{function} takes {expected} argument(s) but {actual} were given")]
    Arity {
        module: String,
        function: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("scheduler is not running")]
    NotRunning,

    #[error("scheduler must be started inside a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("failed to load job definitions: {0}")]
    Source(#[from] jobdesk_db::DbError),
}
