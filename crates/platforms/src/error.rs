use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("token rejected")]
    TokenRejected,
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

impl PlatformError {
    /// Failures that are expected to clear up on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::RateLimited { .. } | Self::TokenRejected => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Failures that mean the configured credentials will never work.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::MissingCredentials(_)
        )
    }

    /// Build an error from a non-success response, consuming its body.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::UnexpectedStatus { status, body }
    }
}
