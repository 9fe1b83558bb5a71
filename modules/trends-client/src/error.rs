use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrendsError>;

#[derive(Debug, Error)]
pub enum TrendsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl TrendsError {
    /// Rate limits, timeouts, network failures and 5xx responses may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TrendsError::Network(_) | TrendsError::Timeout | TrendsError::RateLimited { .. } => {
                true
            }
            TrendsError::Api { status, .. } => *status >= 500,
            TrendsError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for TrendsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrendsError::Timeout
        } else if err.is_decode() {
            TrendsError::Parse(err.to_string())
        } else {
            TrendsError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TrendsError {
    fn from(err: serde_json::Error) -> Self {
        TrendsError::Parse(err.to_string())
    }
}
