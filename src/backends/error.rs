use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("API request failed: {message}")]
    RequestFailed {
        message: String,
        status: Option<u16>,
    },

    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Server error (status {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Backend returned an empty response")]
    EmptyResponse,

    #[error("Token counting failed: {0}")]
    TokenCountFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    StreamError(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimitExceeded { .. }
                | BackendError::ServerError {
                    status: 500..=599,
                    ..
                }
                | BackendError::NetworkError(_)
        )
    }
}
