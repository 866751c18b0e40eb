//! Bounded retry for destination requests.
//!
//! 5xx, 408, 429 and transport failures are retried with exponential backoff;
//! a `Retry-After` header on 429 overrides the computed delay. Any other 4xx
//! fails immediately.

use std::future::Future;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use stream_platforms::backoff::parse_retry_after;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{reason}")]
    Retryable {
        reason: String,
        retry_after: Option<Duration>,
    },
    #[error("{0}")]
    Permanent(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::Retryable {
                reason: format!("request failed: {e}"),
                retry_after: None,
            }
        } else {
            Self::Permanent(format!("request failed: {e}"))
        }
    }
}

/// Pass successful responses through and classify the rest.
pub async fn classify_response(response: Response) -> Result<Response, DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    let reason = format!("{status}: {}", body.trim());

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        Err(DispatchError::Retryable {
            reason,
            retry_after,
        })
    } else {
        Err(DispatchError::Permanent(reason))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before attempt `attempt + 1`, given that attempt `attempt` failed.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        retry_after.unwrap_or(computed).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    pub async fn run<T, F, Fut>(&self, destination: &str, mut op: F) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(DispatchError::Retryable {
                    reason,
                    retry_after,
                }) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, retry_after);
                    warn!(
                        destination,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay = ?delay,
                        %reason,
                        "delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!(destination, attempt, error = %e, "giving up on delivery");
                    return Err(e);
                }
            }
        }
    }
}
