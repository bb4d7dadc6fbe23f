use thiserror::Error;

/// Typed error hierarchy for chatsync.
///
/// Use at module boundaries (API calls, cache access, orchestrator operations).
/// Internal/leaf functions can continue using `anyhow::Result` — the `Internal`
/// variant allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum ChatSyncError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },

    #[error("Request failed: {message}")]
    Request { message: String, retryable: bool },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Cache corrupt: {0}")]
    CacheCorrupt(String),

    #[error("Invalid operation state: {0}")]
    State(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using ChatSyncError.
pub type ChatSyncResult<T> = std::result::Result<T, ChatSyncError>;

impl ChatSyncError {
    /// Whether this error is retryable (rate limits, transient request errors).
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatSyncError::RateLimited { .. } => true,
            ChatSyncError::Request { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
