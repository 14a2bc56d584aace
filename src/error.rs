use thiserror::Error;

use crate::model::BlockingLease;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("reservation conflict: {}", describe_blocking(.blocking))]
    Conflict { blocking: Vec<BlockingLease> },

    #[error("lease '{0}' not found (unknown, released, or expired)")]
    NotFound(String),

    #[error("lease '{lease_id}' is held by '{actual}', not '{holder}'")]
    Forbidden {
        lease_id: String,
        holder: String,
        actual: String,
    },

    #[error("timed out waiting for project '{0}'")]
    Timeout(String),

    #[error("commit blocked: {0} staged path(s) are leased by other agents")]
    GuardBlocked(usize),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

impl LeaseError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict { .. } => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::Timeout(_) => "timeout",
            Self::GuardBlocked(_) => "guard_blocked",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
            Self::Db(_) => "db_error",
            Self::Git(_) => "git_error",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Timeout(_))
    }

    pub fn blocking(&self) -> Option<&[BlockingLease]> {
        match self {
            Self::Conflict { blocking } => Some(blocking),
            _ => None,
        }
    }
}

fn describe_blocking(blocking: &[BlockingLease]) -> String {
    blocking
        .iter()
        .map(|b| format!("{} holds {} [{}]", b.holder, b.patterns.join(", "), b.mode))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, LeaseError>;
