use thiserror::Error;

use crate::auth::retry::Retryable;

/// Failures talking to the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("record store unavailable ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("invalid record store response: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        if status >= 500 {
            Self::Upstream { status, message }
        } else {
            Self::Rejected { status, message }
        }
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::Upstream { .. } => true,
            Self::Rejected { status, .. } => *status == 429,
            Self::InvalidIdentifier(_) | Self::Decode(_) | Self::Config(_) => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
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
