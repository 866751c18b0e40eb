//! Twitch live status via the Helix API with an app access token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{check_response, check_token_response};
use crate::auth::{AccessToken, TokenManager, TokenResponse};
use crate::backoff::ChannelBackoff;
use crate::channel::{Channel, Platform};
use crate::checker::{DisableSwitch, PlatformChecker, status_from_error};
use crate::credentials::CredentialSet;
use crate::error::PlatformError;
use crate::status::{LiveStream, StreamStatus, UnknownReason};

#[derive(Debug, Deserialize)]
struct HelixStreams {
    data: Vec<HelixStream>,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    id: String,
    user_login: String,
    #[serde(rename = "type", default)]
    stream_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    game_name: Option<String>,
    #[serde(default)]
    viewer_count: Option<u64>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
}

pub struct TwitchChecker {
    client: Client,
    auth_url: String,
    api_url: String,
    tokens: TokenManager,
    backoff: ChannelBackoff,
    disabled: DisableSwitch,
}

impl TwitchChecker {
    pub const AUTH_URL: &'static str = "https://id.twitch.tv";
    pub const API_URL: &'static str = "https://api.twitch.tv";

    pub fn new(client: Client) -> Self {
        Self::with_urls(client, Self::AUTH_URL, Self::API_URL)
    }

    pub fn with_urls(client: Client, auth_url: &str, api_url: &str) -> Self {
        Self {
            client,
            auth_url: auth_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            tokens: TokenManager::new("twitch"),
            backoff: ChannelBackoff::default(),
            disabled: DisableSwitch::default(),
        }
    }

    async fn request_token(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<AccessToken, PlatformError> {
        let response = self
            .client
            .post(format!("{}/oauth2/token", self.auth_url))
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

    async fn fetch_stream(
        &self,
        channel: &Channel,
        client_id: &str,
        token: &str,
    ) -> Result<StreamStatus, PlatformError> {
        let login = channel.identifier.to_ascii_lowercase();
        let response = self
            .client
            .get(format!("{}/helix/streams", self.api_url))
            .query(&[("user_login", login.as_str())])
            .header("Client-Id", client_id)
            .bearer_auth(token)
            .send()
            .await?;

        let streams: HelixStreams = check_response(response).await?.json().await?;

        let Some(stream) = streams
            .data
            .into_iter()
            .find(|s| s.stream_type.is_empty() || s.stream_type == "live")
        else {
            debug!(channel = %channel.key(), "offline");
            return Ok(StreamStatus::Offline);
        };

        Ok(StreamStatus::Live(LiveStream {
            url: format!("https://www.twitch.tv/{}", stream.user_login),
            session_id: Some(stream.id),
            title: Some(stream.title).filter(|t| !t.is_empty()),
            started_at: stream.started_at,
            category: stream.game_name.filter(|g| !g.is_empty()),
            viewer_count: stream.viewer_count,
        }))
    }

    async fn query(
        &self,
        channel: &Channel,
        credentials: &CredentialSet,
    ) -> Result<StreamStatus, PlatformError> {
        let client_id = credentials
            .get("client_id")
            .ok_or(PlatformError::MissingCredentials("client_id"))?;
        let client_secret = credentials
            .get("client_secret")
            .ok_or(PlatformError::MissingCredentials("client_secret"))?;

        let token = self
            .tokens
            .get_or_refresh(|| self.request_token(client_id, client_secret))
            .await?;

        match self.fetch_stream(channel, client_id, &token).await {
            Err(PlatformError::TokenRejected) => {
                // Re-authenticate once and retry with the fresh token.
                self.tokens.invalidate(&token).await;
                let token = self
                    .tokens
                    .get_or_refresh(|| self.request_token(client_id, client_secret))
                    .await?;
                self.fetch_stream(channel, client_id, &token).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl PlatformChecker for TwitchChecker {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    async fn check(&self, channel: &Channel, credentials: &CredentialSet) -> StreamStatus {
        if self.disabled.is_disabled_for(credentials) {
            return StreamStatus::Unknown(UnknownReason::Disabled);
        }
        if let Some(remaining) = self.backoff.remaining(&channel.key()) {
            debug!(channel = %channel.key(), remaining = ?remaining, "skipping check during backoff");
            return StreamStatus::Unknown(UnknownReason::BackingOff);
        }

        match self.query(channel, credentials).await {
            Ok(status) => status,
            Err(e) if e.is_auth_failure() => {
                self.disabled.disable(Platform::Twitch, credentials, &e);
                StreamStatus::Unknown(UnknownReason::Disabled)
            }
            Err(e) => status_from_error(channel, e, &self.backoff),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn credentials() -> CredentialSet {
        [("client_id", "cid"), ("client_secret", "secret")]
            .into_iter()
            .collect()
    }

    fn channel() -> Channel {
        Channel::new(Platform::Twitch, "SomeStreamer", "Some Streamer")
    }

    fn token_body(token: &str) -> String {
        serde_json::json!({ "access_token": token, "expires_in": 3600, "token_type": "bearer" })
            .to_string()
    }

    fn checker(server: &mockito::ServerGuard) -> TwitchChecker {
        TwitchChecker::with_urls(crate::client::create_client(None).unwrap(), &server.url(), &server.url())
    }

    #[tokio::test]
    async fn test_live_stream() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth2/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "client_credentials".into(),
            ))
            .with_status(200)
            .with_body(token_body("tok"))
            .create_async()
            .await;
        let streams = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::UrlEncoded(
                "user_login".into(),
                "somestreamer".into(),
            ))
            .match_header("authorization", "Bearer tok")
            .match_header("client-id", "cid")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "data": [{
                        "id": "40952121085",
                        "user_login": "somestreamer",
                        "type": "live",
                        "title": "Ranked grind",
                        "game_name": "Chess",
                        "viewer_count": 42,
                        "started_at": "2024-05-01T18:30:00Z"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let status = checker(&server).check(&channel(), &credentials()).await;

        let live = status.live().expect("should be live");
        assert_eq!(live.session_id.as_deref(), Some("40952121085"));
        assert_eq!(live.title.as_deref(), Some("Ranked grind"));
        assert_eq!(live.url, "https://www.twitch.tv/somestreamer");
        assert_eq!(live.category.as_deref(), Some("Chess"));
        assert_eq!(live.viewer_count, Some(42));
        assert!(live.started_at.is_some());

        token.assert_async().await;
        streams.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_reused_across_checks() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(token_body("tok"))
            .expect(1)
            .create_async()
            .await;
        let streams = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .expect(3)
            .create_async()
            .await;

        let checker = checker(&server);
        for _ in 0..3 {
            assert_eq!(
                checker.check(&channel(), &credentials()).await,
                StreamStatus::Offline
            );
        }

        token.assert_async().await;
        streams.assert_async().await;
    }

    #[tokio::test]
    async fn test_reauthenticates_after_401() {
        let mut server = mockito::Server::new_async().await;
        let issued = Arc::new(AtomicU32::new(0));
        let counter = issued.clone();
        let token = server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body_from_request(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let value = if n == 0 { "old" } else { "new" };
                token_body(value).into_bytes()
            })
            .expect(2)
            .create_async()
            .await;
        let rejected = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer old")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer new")
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let status = checker(&server).check(&channel(), &credentials()).await;
        assert_eq!(status, StreamStatus::Offline);

        token.assert_async().await;
        rejected.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_credentials_disables_checker() {
        let server = mockito::Server::new_async().await;
        let status = checker(&server).check(&channel(), &CredentialSet::new()).await;
        assert_eq!(status, StreamStatus::Unknown(UnknownReason::Disabled));
    }

    #[tokio::test]
    async fn test_rejected_secret_disables_checker() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth2/token")
            .with_status(400)
            .with_body(r#"{"status":400,"message":"invalid client secret"}"#)
            .expect(1)
            .create_async()
            .await;

        let checker = checker(&server);
        for _ in 0..2 {
            assert_eq!(
                checker.check(&channel(), &credentials()).await,
                StreamStatus::Unknown(UnknownReason::Disabled)
            );
        }
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_backs_off_single_channel() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(token_body("tok"))
            .create_async()
            .await;
        let limited = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::UrlEncoded(
                "user_login".into(),
                "somestreamer".into(),
            ))
            .with_status(429)
            .with_header("retry-after", "120")
            .expect(1)
            .create_async()
            .await;
        let other = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::UrlEncoded("user_login".into(), "other".into()))
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let checker = checker(&server);

        assert_eq!(
            checker.check(&channel(), &credentials()).await,
            StreamStatus::Unknown(UnknownReason::RateLimited)
        );
        assert_eq!(
            checker.check(&channel(), &credentials()).await,
            StreamStatus::Unknown(UnknownReason::BackingOff)
        );

        let other_channel = Channel::from_identifier(Platform::Twitch, "other");
        assert_eq!(
            checker.check(&other_channel, &credentials()).await,
            StreamStatus::Offline
        );

        limited.assert_async().await;
        other.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_unknown() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/oauth2/token")
            .with_status(200)
            .with_body(token_body("tok"))
            .create_async()
            .await;
        let _streams = server
            .mock("GET", "/helix/streams")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let status = checker(&server).check(&channel(), &credentials()).await;
        assert!(matches!(
            status,
            StreamStatus::Unknown(UnknownReason::Transient(_))
        ));
    }
}
