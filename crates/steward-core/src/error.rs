use thiserror::Error;

#[derive(Debug, Error)]
pub enum StewardError {
    #[error("not initialized: run 'steward init'")]
    NotInitialized,

    #[error("no approved plan found for domain '{0}'")]
    PlanNotFound(String),

    #[error("invalid plan {path}: {reason}")]
    InvalidPlan { path: String, reason: String },

    #[error("unknown server '{0}'")]
    UnknownServer(String),

    #[error("operation '{operation}' is not supported by {server}: {reason}")]
    UnsupportedOperation {
        server: String,
        operation: String,
        reason: String,
    },

    #[error("missing required parameter '{param}' for {server}.{operation}")]
    MissingParameter {
        server: String,
        operation: String,
        param: String,
    },

    #[error(
        "unknown failure type '{0}': must be connection_timeout, auth_failure, rate_limit, or server_error"
    )]
    UnknownFailureType(String),

    #[error("invalid source name '{0}': must be alphanumeric with '-' or '_'")]
    InvalidName(String),

    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("another instance holds the lock at {path}")]
    LockHeld { path: String, holder: Option<u32> },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StewardError>;
