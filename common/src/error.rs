use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Which quota rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    PerMinute,
    Daily,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerMinute => write!(f, "per-minute"),
            Self::Daily => write!(f, "daily"),
        }
    }
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("{scope} quota exceeded: {limit} allowed")]
    QuotaExceeded {
        scope: QuotaScope,
        limit: u32,
        remaining: u32,
        retry_after_secs: Option<u64>,
    },
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Upstream collaborator failure: {0}")]
    Upstream(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
