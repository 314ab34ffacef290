use thiserror::Error;

/// Failures talking to the identity provider.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("provider unavailable ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("invalid provider response: {0}")]
    Decode(String),
    #[error("provider returned no session")]
    MissingSession,
    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Transient failures worth repeating verbatim.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::Upstream { .. } => true,
            Self::Rejected { status, .. } => *status == 429,
            Self::Decode(_) | Self::MissingSession | Self::Config(_) => false,
        }
    }

    /// Map an HTTP status and provider message to the matching variant.
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        if status >= 500 {
            Self::Upstream { status, message }
        } else {
            Self::Rejected { status, message }
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
