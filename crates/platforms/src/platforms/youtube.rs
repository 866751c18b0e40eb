//! YouTube live status via the Data API v3.
//!
//! Channels may be configured by channel id (`UC...`) or by handle (`@name`).
//! Handles are resolved once and cached for the lifetime of the checker.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Response, StatusCode};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, info};

use super::{check_response, parse_timestamp};
use crate::backoff::ChannelBackoff;
use crate::channel::{Channel, Platform};
use crate::checker::{DisableSwitch, PlatformChecker, status_from_error};
use crate::credentials::CredentialSet;
use crate::error::PlatformError;
use crate::status::{LiveStream, StreamStatus, UnknownReason};

/// Suspension applied when the daily quota is exhausted.
const QUOTA_BACKOFF: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchList {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    #[serde(default)]
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    live_broadcast_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    reason: String,
}

pub struct YouTubeChecker {
    client: Client,
    api_url: String,
    channel_ids: Mutex<FxHashMap<String, String>>,
    backoff: ChannelBackoff,
    disabled: DisableSwitch,
}

impl YouTubeChecker {
    pub const API_URL: &'static str = "https://www.googleapis.com";

    pub fn new(client: Client) -> Self {
        Self::with_url(client, Self::API_URL)
    }

    pub fn with_url(client: Client, api_url: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            channel_ids: Mutex::new(FxHashMap::default()),
            backoff: ChannelBackoff::default(),
            disabled: DisableSwitch::default(),
        }
    }

    fn is_channel_id(identifier: &str) -> bool {
        identifier.len() == 24 && identifier.starts_with("UC")
    }

    async fn resolve_channel_id(
        &self,
        identifier: &str,
        api_key: &str,
    ) -> Result<String, PlatformError> {
        if Self::is_channel_id(identifier) {
            return Ok(identifier.to_string());
        }

        let handle = format!("@{}", identifier.trim_start_matches('@'));
        let cache_key = handle.to_ascii_lowercase();
        if let Some(id) = self.channel_ids.lock().get(&cache_key) {
            return Ok(id.clone());
        }

        let response = self
            .client
            .get(format!("{}/youtube/v3/channels", self.api_url))
            .query(&[("part", "id"), ("forHandle", handle.as_str()), ("key", api_key)])
            .send()
            .await?;

        let list: ChannelList = Self::check_api_response(response).await?.json().await?;
        let id = list
            .items
            .into_iter()
            .next()
            .map(|item| item.id)
            .ok_or_else(|| PlatformError::ChannelNotFound(handle.clone()))?;

        info!(handle = %handle, channel_id = %id, "resolved youtube handle");
        self.channel_ids.lock().insert(cache_key, id.clone());
        Ok(id)
    }

    async fn query(
        &self,
        channel: &Channel,
        credentials: &CredentialSet,
    ) -> Result<StreamStatus, PlatformError> {
        let api_key = credentials
            .get("api_key")
            .ok_or(PlatformError::MissingCredentials("api_key"))?;

        let channel_id = self.resolve_channel_id(&channel.identifier, api_key).await?;

        let response = self
            .client
            .get(format!("{}/youtube/v3/search", self.api_url))
            .query(&[
                ("part", "snippet"),
                ("channelId", channel_id.as_str()),
                ("eventType", "live"),
                ("type", "video"),
                ("key", api_key),
            ])
            .send()
            .await?;

        let results: SearchList = Self::check_api_response(response).await?.json().await?;

        let live = results.items.into_iter().find_map(|item| {
            let video_id = item.id.video_id?;
            let snippet = item.snippet;
            let still_live = snippet
                .as_ref()
                .and_then(|s| s.live_broadcast_content.as_deref())
                .is_none_or(|content| content == "live");
            still_live.then_some((video_id, snippet))
        });

        let Some((video_id, snippet)) = live else {
            debug!(channel = %channel.key(), "offline");
            return Ok(StreamStatus::Offline);
        };

        let (title, started_at) = snippet
            .map(|s| (s.title, s.published_at.as_deref().and_then(parse_timestamp)))
            .unwrap_or_default();

        Ok(StreamStatus::Live(LiveStream {
            url: format!("https://www.youtube.com/watch?v={video_id}"),
            session_id: Some(video_id),
            title: title.filter(|t| !t.is_empty()),
            started_at,
            category: None,
            viewer_count: None,
        }))
    }

    /// YouTube reports quota exhaustion and bad keys as 400/403 with a reason code.
    async fn check_api_response(response: Response) -> Result<Response, PlatformError> {
        let status = response.status();
        if status != StatusCode::FORBIDDEN && status != StatusCode::BAD_REQUEST {
            return check_response(response).await;
        }

        let body = response.text().await.unwrap_or_default();
        let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(&body) else {
            return Err(PlatformError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        };

        let reasons: Vec<&str> = parsed
            .error
            .errors
            .iter()
            .map(|e| e.reason.as_str())
            .collect();

        if reasons
            .iter()
            .any(|r| matches!(*r, "quotaExceeded" | "rateLimitExceeded" | "dailyLimitExceeded"))
        {
            return Err(PlatformError::RateLimited {
                retry_after: Some(QUOTA_BACKOFF),
            });
        }
        if reasons
            .iter()
            .any(|r| matches!(*r, "keyInvalid" | "keyExpired" | "accessNotConfigured" | "forbidden"))
        {
            return Err(PlatformError::AuthenticationFailed(parsed.error.message));
        }

        Err(PlatformError::UnexpectedStatus {
            status: status.as_u16(),
            body: parsed.error.message,
        })
    }
}

#[async_trait]
impl PlatformChecker for YouTubeChecker {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    async fn check(&self, channel: &Channel, credentials: &CredentialSet) -> StreamStatus {
        if self.disabled.is_disabled_for(credentials) {
            return StreamStatus::Unknown(UnknownReason::Disabled);
        }
        if self.backoff.remaining(&channel.key()).is_some() {
            return StreamStatus::Unknown(UnknownReason::BackingOff);
        }

        match self.query(channel, credentials).await {
            Ok(status) => status,
            Err(e) if e.is_auth_failure() => {
                self.disabled.disable(Platform::YouTube, credentials, &e);
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

    const CHANNEL_ID: &str = "UCabcdefghijklmnopqrstuv";

    fn credentials() -> CredentialSet {
        [("api_key", "key123")].into_iter().collect()
    }

    fn checker(server: &mockito::ServerGuard) -> YouTubeChecker {
        YouTubeChecker::with_url(crate::client::create_client(None).unwrap(), &server.url())
    }

    fn error_body(code: u16, reason: &str) -> String {
        serde_json::json!({
            "error": {
                "code": code,
                "message": format!("{reason} happened"),
                "errors": [{ "reason": reason, "domain": "youtube.quota" }]
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_live_by_channel_id() {
        let mut server = mockito::Server::new_async().await;
        let search = server
            .mock("GET", "/youtube/v3/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("channelId".into(), CHANNEL_ID.into()),
                Matcher::UrlEncoded("eventType".into(), "live".into()),
                Matcher::UrlEncoded("key".into(), "key123".into()),
            ]))
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "items": [{
                        "id": { "kind": "youtube#video", "videoId": "dQw4w9WgXcQ" },
                        "snippet": {
                            "title": "Late night coding",
                            "publishedAt": "2024-05-01T18:30:00Z",
                            "liveBroadcastContent": "live"
                        }
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let channel = Channel::from_identifier(Platform::YouTube, CHANNEL_ID);
        let status = checker(&server).check(&channel, &credentials()).await;

        let live = status.live().expect("should be live");
        assert_eq!(live.session_id.as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(live.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(live.title.as_deref(), Some("Late night coding"));
        assert!(live.started_at.is_some());
        search.assert_async().await;
    }

    #[tokio::test]
    async fn test_handle_resolved_once() {
        let mut server = mockito::Server::new_async().await;
        let lookup = server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::UrlEncoded("forHandle".into(), "@somecreator".into()))
            .with_status(200)
            .with_body(format!(r#"{{"items":[{{"id":"{CHANNEL_ID}"}}]}}"#))
            .expect(1)
            .create_async()
            .await;
        let search = server
            .mock("GET", "/youtube/v3/search")
            .match_query(Matcher::UrlEncoded("channelId".into(), CHANNEL_ID.into()))
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .expect(2)
            .create_async()
            .await;

        let checker = checker(&server);
        let channel = Channel::from_identifier(Platform::YouTube, "@somecreator");
        for _ in 0..2 {
            assert_eq!(
                checker.check(&channel, &credentials()).await,
                StreamStatus::Offline
            );
        }

        lookup.assert_async().await;
        search.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_handle_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/youtube/v3/channels")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .create_async()
            .await;

        let channel = Channel::from_identifier(Platform::YouTube, "nobody");
        let status = checker(&server).check(&channel, &credentials()).await;
        assert!(matches!(
            status,
            StreamStatus::Unknown(UnknownReason::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_quota_exceeded_backs_off() {
        let mut server = mockito::Server::new_async().await;
        let search = server
            .mock("GET", "/youtube/v3/search")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(error_body(403, "quotaExceeded"))
            .expect(1)
            .create_async()
            .await;

        let checker = checker(&server);
        let channel = Channel::from_identifier(Platform::YouTube, CHANNEL_ID);
        assert_eq!(
            checker.check(&channel, &credentials()).await,
            StreamStatus::Unknown(UnknownReason::RateLimited)
        );
        assert_eq!(
            checker.check(&channel, &credentials()).await,
            StreamStatus::Unknown(UnknownReason::BackingOff)
        );
        search.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_key_disables_until_key_changes() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("GET", "/youtube/v3/search")
            .match_query(Matcher::UrlEncoded("key".into(), "key123".into()))
            .with_status(400)
            .with_body(error_body(400, "keyInvalid"))
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("GET", "/youtube/v3/search")
            .match_query(Matcher::UrlEncoded("key".into(), "fresh".into()))
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let checker = checker(&server);
        let channel = Channel::from_identifier(Platform::YouTube, CHANNEL_ID);
        for _ in 0..2 {
            assert_eq!(
                checker.check(&channel, &credentials()).await,
                StreamStatus::Unknown(UnknownReason::Disabled)
            );
        }

        let rotated: CredentialSet = [("api_key", "fresh")].into_iter().collect();
        assert_eq!(
            checker.check(&channel, &rotated).await,
            StreamStatus::Offline
        );

        rejected.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_key_disables() {
        let server = mockito::Server::new_async().await;
        let channel = Channel::from_identifier(Platform::YouTube, CHANNEL_ID);
        let status = checker(&server).check(&channel, &CredentialSet::new()).await;
        assert_eq!(status, StreamStatus::Unknown(UnknownReason::Disabled));
    }
}
