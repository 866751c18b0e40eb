//! Access token caching.
//!
//! Each authenticating checker owns one [`TokenManager`], a small state machine:
//!
//! ```text
//! Unauthenticated --refresh ok--> Authenticated --expiry / 401--> Expired
//!        ^                                                          |
//!        +--------------------- refresh failed --------------------+
//! ```
//!
//! Refreshes are serialized by an async mutex held across the token request, so
//! concurrent callers wait for the in-flight refresh instead of issuing their own.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::PlatformError;

/// Tokens are treated as expired this long before the platform says so.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// OAuth client-credentials token response (Twitch and Kick share this shape).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl From<TokenResponse> for AccessToken {
    fn from(response: TokenResponse) -> Self {
        AccessToken::new(
            response.access_token,
            response.expires_in.map(Duration::from_secs),
        )
    }
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    /// A lifetime too large to represent is treated as no expiry.
    pub fn new(value: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            expires_at: expires_in
                .and_then(|d| Instant::now().checked_add(d.saturating_sub(EXPIRY_MARGIN))),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Observable token state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Unauthenticated,
    Authenticated,
    Expired,
}

#[derive(Debug)]
enum Slot {
    Unauthenticated,
    Authenticated(AccessToken),
    Expired,
}

#[derive(Debug)]
pub struct TokenManager {
    name: &'static str,
    slot: Mutex<Slot>,
}

impl TokenManager {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot::Unauthenticated),
        }
    }

    pub async fn state(&self) -> TokenState {
        match &*self.slot.lock().await {
            Slot::Unauthenticated => TokenState::Unauthenticated,
            Slot::Authenticated(token) if token.is_expired() => TokenState::Expired,
            Slot::Authenticated(_) => TokenState::Authenticated,
            Slot::Expired => TokenState::Expired,
        }
    }

    /// Return the cached token, running `refresh` if there is none or it expired.
    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, PlatformError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, PlatformError>>,
    {
        let mut slot = self.slot.lock().await;

        if let Slot::Authenticated(token) = &*slot {
            if !token.is_expired() {
                return Ok(token.value.clone());
            }
            debug!(platform = self.name, "access token expired");
            *slot = Slot::Expired;
        }

        match refresh().await {
            Ok(token) => {
                info!(platform = self.name, "obtained access token");
                let value = token.value.clone();
                *slot = Slot::Authenticated(token);
                Ok(value)
            }
            Err(e) => {
                *slot = Slot::Unauthenticated;
                Err(e)
            }
        }
    }

    /// Mark `rejected` as expired after the API answered 401.
    ///
    /// A token that was already replaced by a concurrent refresh is left alone.
    pub async fn invalidate(&self, rejected: &str) {
        let mut slot = self.slot.lock().await;
        if let Slot::Authenticated(token) = &*slot
            && token.value == rejected
        {
            debug!(platform = self.name, "access token rejected");
            *slot = Slot::Expired;
        }
    }
}
