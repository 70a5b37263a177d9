use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failures of a single call to the image-generation service.
///
/// None of these are retried by the client; callers decide (see `is_retryable`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("rate limited by the image service")]
    RateLimited { retry_after: Option<u64> },

    #[error("request rejected: {0}")]
    ValidationError(String),

    #[error("image service error (status {status}): {message}")]
    RemoteError { status: u16, message: String },

    #[error("connection error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::AuthError(_) => ErrorKind::AuthError,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::ValidationError(_) => ErrorKind::ValidationError,
            ApiError::RemoteError { .. } => ErrorKind::RemoteError,
            ApiError::Transport(_) => ErrorKind::Transport,
            ApiError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Whether resubmitting the same request could succeed. Advisory only.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. }
                | ApiError::Timeout(_)
                | ApiError::Transport(_)
                | ApiError::RemoteError { status: 500..=599, .. }
        )
    }
}

/// Stable, serializable error classification for UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    AuthError,
    RateLimited,
    ValidationError,
    RemoteError,
    Transport,
    Timeout,
    /// The caller stopped waiting before the stage finished.
    Cancelled,
}
