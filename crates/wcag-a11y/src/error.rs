use std::future::Future;
use std::time::Duration;

use mcp_common::error::CommonError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] CommonError),
}

/// Coarse classification callers use to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Upstream,
    Integrity,
    Config,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Upstream(_) | AppError::Common(_) => ErrorKind::Upstream,
            AppError::Integrity(_) | AppError::Io(_) => ErrorKind::Integrity,
            AppError::Config(_) => ErrorKind::Config,
        }
    }

    /// Only upstream failures (snapshot, embedding, rerank, storage services) may succeed
    /// on a second attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Upstream
    }
}

/// Await an upstream model call, failing with an upstream error once `timeout` passes.
pub async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, CommonError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::Upstream(format!(
            "{what} timed out after {}s",
            timeout.as_secs()
        ))),
    }
}
