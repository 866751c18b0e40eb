//! Kick live status.
//!
//! With client credentials the official public API (`api.kick.com`) is used.
//! Without them, or once they are rejected, the checker falls back to the
//! unauthenticated website endpoint, which is rate limited more aggressively
//! and occasionally blocked by the CDN.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{check_response, check_token_response, parse_timestamp};
use crate::auth::{AccessToken, TokenManager, TokenResponse};
use crate::backoff::ChannelBackoff;
use crate::channel::{Channel, Platform};
use crate::checker::{PlatformChecker, status_from_error};
use crate::credentials::CredentialSet;
use crate::error::PlatformError;
use crate::status::{LiveStream, StreamStatus, UnknownReason};

#[derive(Debug, Deserialize)]
struct ChannelsResponse {
    #[serde(default)]
    data: Vec<ApiChannel>,
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    slug: String,
    #[serde(default)]
    stream_title: Option<String>,
    #[serde(default)]
    category: Option<Category>,
    #[serde(default)]
    stream: Option<ApiStream>,
}

#[derive(Debug, Deserialize)]
struct ApiStream {
    #[serde(default)]
    is_live: bool,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    viewer_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Category {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PublicChannel {
    slug: String,
    #[serde(default)]
    livestream: Option<PublicLivestream>,
}

#[derive(Debug, Deserialize)]
struct PublicLivestream {
    id: u64,
    #[serde(default)]
    session_title: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default = "default_true")]
    is_live: bool,
    #[serde(default)]
    viewer_count: Option<u64>,
    #[serde(default)]
    categories: Vec<Category>,
}

fn default_true() -> bool {
    true
}

fn channel_url(slug: &str) -> String {
    format!("https://kick.com/{slug}")
}

/// Session id shared by both endpoints: the stream start time in RFC 3339.
///
/// The official API exposes no stream id, so the start time is the only value
/// both endpoints agree on. `fallback` is used when the start time is missing.
fn session_id(started_at: Option<DateTime<Utc>>, fallback: Option<String>) -> Option<String> {
    started_at
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .or(fallback)
        .filter(|id| !id.is_empty())
}

pub struct KickChecker {
    client: Client,
    auth_url: String,
    api_url: String,
    public_url: String,
    tokens: TokenManager,
    backoff: ChannelBackoff,
    /// Fingerprint of the credential set that was rejected.
    fallback_for: Mutex<Option<u64>>,
    announced_anonymous: AtomicBool,
}

impl KickChecker {
    pub const AUTH_URL: &'static str = "https://id.kick.com";
    pub const API_URL: &'static str = "https://api.kick.com";
    pub const PUBLIC_URL: &'static str = "https://kick.com";

    pub fn new(client: Client) -> Self {
        Self::with_urls(client, Self::AUTH_URL, Self::API_URL, Self::PUBLIC_URL)
    }

    pub fn with_urls(client: Client, auth_url: &str, api_url: &str, public_url: &str) -> Self {
        Self {
            client,
            auth_url: auth_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
            tokens: TokenManager::new("kick"),
            backoff: ChannelBackoff::default(),
            fallback_for: Mutex::new(None),
            announced_anonymous: AtomicBool::new(false),
        }
    }

    async fn request_token(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<AccessToken, PlatformError> {
        let response = self
            .client
            .post(format!("{}/oauth/token", self.auth_url))
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let token: TokenResponse = check_token_response(response).await?.json().await?;
        Ok(token.into())
    }

    async fn fetch_authenticated(
        &self,
        channel: &Channel,
        token: &str,
    ) -> Result<StreamStatus, PlatformError> {
        let slug = channel.identifier.to_ascii_lowercase();
        let response = self
            .client
            .get(format!("{}/public/v1/channels", self.api_url))
            .query(&[("slug", slug.as_str())])
            .bearer_auth(token)
            .send()
            .await?;

        let channels: ChannelsResponse = check_response(response).await?.json().await?;
        let found = channels
            .data
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::ChannelNotFound(slug.clone()))?;

        let Some(stream) = found.stream.filter(|s| s.is_live) else {
            debug!(channel = %channel.key(), "offline");
            return Ok(StreamStatus::Offline);
        };

        let started_at = stream.start_time.as_deref().and_then(parse_timestamp);
        Ok(StreamStatus::Live(LiveStream {
            url: channel_url(&found.slug),
            session_id: session_id(started_at, stream.start_time),
            title: found.stream_title.filter(|t| !t.is_empty()),
            started_at,
            category: found.category.map(|c| c.name),
            viewer_count: stream.viewer_count,
        }))
    }

    async fn query_authenticated(
        &self,
        channel: &Channel,
        client_id: &str,
        client_secret: &str,
    ) -> Result<StreamStatus, PlatformError> {
        let token = self
            .tokens
            .get_or_refresh(|| self.request_token(client_id, client_secret))
            .await?;

        match self.fetch_authenticated(channel, &token).await {
            Err(PlatformError::TokenRejected) => {
                self.tokens.invalidate(&token).await;
                let token = self
                    .tokens
                    .get_or_refresh(|| self.request_token(client_id, client_secret))
                    .await?;
                self.fetch_authenticated(channel, &token).await
            }
            other => other,
        }
    }

    async fn query_public(&self, channel: &Channel) -> Result<StreamStatus, PlatformError> {
        let slug = channel.identifier.to_ascii_lowercase();
        let response = self
            .client
            .get(format!(
                "{}/api/v2/channels/{}",
                self.public_url,
                urlencoding::encode(&slug)
            ))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(PlatformError::ChannelNotFound(slug));
        }

        let found: PublicChannel = check_response(response).await?.json().await?;
        let Some(live) = found.livestream.filter(|l| l.is_live) else {
            debug!(channel = %channel.key(), "offline");
            return Ok(StreamStatus::Offline);
        };

        let started_at = live.created_at.as_deref().and_then(parse_timestamp);
        Ok(StreamStatus::Live(LiveStream {
            url: channel_url(&found.slug),
            session_id: session_id(started_at, Some(live.id.to_string())),
            title: live.session_title.filter(|t| !t.is_empty()),
            started_at,
            category: live.categories.into_iter().next().map(|c| c.name),
            viewer_count: live.viewer_count,
        }))
    }

    /// Credentials to use for the authenticated API, if any are usable.
    fn usable_credentials<'a>(&self, credentials: &'a CredentialSet) -> Option<(&'a str, &'a str)> {
        let pair = credentials
            .get("client_id")
            .zip(credentials.get("client_secret"));

        if pair.is_none() {
            if !self.announced_anonymous.swap(true, Ordering::Relaxed) {
                info!("no kick credentials configured, using the public endpoint");
            }
            return None;
        }

        if *self.fallback_for.lock() == Some(credentials.fingerprint()) {
            return None;
        }
        pair
    }

    async fn query(
        &self,
        channel: &Channel,
        credentials: &CredentialSet,
    ) -> Result<StreamStatus, PlatformError> {
        let Some((client_id, client_secret)) = self.usable_credentials(credentials) else {
            return self.query_public(channel).await;
        };

        match self
            .query_authenticated(channel, client_id, client_secret)
            .await
        {
            Err(e) if e.is_auth_failure() => {
                warn!(
                    error = %e,
                    "kick credentials rejected, falling back to the public endpoint"
                );
                *self.fallback_for.lock() = Some(credentials.fingerprint());
                self.query_public(channel).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl PlatformChecker for KickChecker {
    fn platform(&self) -> Platform {
        Platform::Kick
    }

    async fn check(&self, channel: &Channel, credentials: &CredentialSet) -> StreamStatus {
        if let Some(remaining) = self.backoff.remaining(&channel.key()) {
            debug!(channel = %channel.key(), remaining = ?remaining, "skipping check during backoff");
            return StreamStatus::Unknown(UnknownReason::BackingOff);
        }

        match self.query(channel, credentials).await {
            Ok(status) => status,
            Err(e) => status_from_error(channel, e, &self.backoff),
        }
    }
}
