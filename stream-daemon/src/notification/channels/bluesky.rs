//! Bluesky post destination (AT Protocol XRPC).
//!
//! Logs in with an app password via `com.atproto.server.createSession`, caches
//! the session and recreates it when it expires or the server rejects it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{DispatchResult, NotificationDispatcher};
use crate::config::BlueskyConfig;
use crate::monitor::NotificationEvent;
use crate::notification::retry::{DispatchError, RetryPolicy, classify_response};
use crate::notification::template::MessageTemplates;

/// Bluesky post length limit.
const POST_LIMIT: usize = 300;

/// Access tokens live for about two hours; refresh a little earlier.
const SESSION_TTL: Duration = Duration::from_secs(90 * 60);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
    #[serde(skip_deserializing, default = "Instant::now")]
    created_at: Instant,
}

impl Session {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= SESSION_TTL
    }
}

#[derive(Debug, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: String,
}

/// Outcome of one createRecord attempt.
enum PostError {
    SessionRejected,
    Dispatch(DispatchError),
}

impl From<DispatchError> for PostError {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

impl From<reqwest::Error> for PostError {
    fn from(e: reqwest::Error) -> Self {
        Self::Dispatch(e.into())
    }
}

pub struct BlueskyDispatcher {
    client: Client,
    service_url: String,
    handle: String,
    app_password: String,
    session: Mutex<Option<Session>>,
    templates: Arc<MessageTemplates>,
    retry: RetryPolicy,
}

impl BlueskyDispatcher {
    /// Returns `None` when the handle or app password is missing.
    pub fn new(
        client: Client,
        config: &BlueskyConfig,
        templates: Arc<MessageTemplates>,
        retry: RetryPolicy,
    ) -> Option<Self> {
        Some(Self {
            client,
            service_url: config.service_url.trim_end_matches('/').to_string(),
            handle: config.handle.clone()?.trim_start_matches('@').to_string(),
            app_password: config.app_password.clone()?,
            session: Mutex::new(None),
            templates,
            retry,
        })
    }

    async fn create_session(&self) -> Result<Session, DispatchError> {
        let response = self
            .client
            .post(format!(
                "{}/xrpc/com.atproto.server.createSession",
                self.service_url
            ))
            .json(&json!({
                "identifier": self.handle,
                "password": self.app_password,
            }))
            .send()
            .await?;

        let session: Session = classify_response(response)
            .await?
            .json()
            .await
            .map_err(|e| DispatchError::Permanent(format!("invalid session response: {e}")))?;
        info!(handle = %self.handle, "bluesky session created");
        Ok(session)
    }

    /// Cached session, created if missing or expired.
    async fn session(&self) -> Result<Session, DispatchError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref()
            && !session.is_expired()
        {
            return Ok(session.clone());
        }
        let session = self.create_session().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    async fn drop_session(&self, rejected: &Session) {
        let mut slot = self.session.lock().await;
        if slot
            .as_ref()
            .is_some_and(|s| s.access_jwt == rejected.access_jwt)
        {
            *slot = None;
        }
    }

    fn build_record(text: &str, url: &str) -> serde_json::Value {
        let mut record = json!({
            "$type": "app.bsky.feed.post",
            "text": text,
            "createdAt": Utc::now().to_rfc3339(),
        });

        // Facet offsets are UTF-8 byte offsets into `text`.
        if let Some(start) = (!url.is_empty()).then(|| text.find(url)).flatten() {
            record["facets"] = json!([{
                "index": { "byteStart": start, "byteEnd": start + url.len() },
                "features": [{ "$type": "app.bsky.richtext.facet#link", "uri": url }],
            }]);
        }

        record
    }

    async fn create_record(
        &self,
        session: &Session,
        record: &serde_json::Value,
    ) -> Result<(), PostError> {
        let response = self
            .client
            .post(format!(
                "{}/xrpc/com.atproto.repo.createRecord",
                self.service_url
            ))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": "app.bsky.feed.post",
                "record": record,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<XrpcError>(&body)
                .map(|e| e.error)
                .unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED
                || matches!(error.as_str(), "ExpiredToken" | "InvalidToken")
            {
                return Err(PostError::SessionRejected);
            }
            return Err(DispatchError::Permanent(format!("{status}: {body}")).into());
        }

        classify_response(response).await?;
        Ok(())
    }

    async fn post(&self, record: &serde_json::Value) -> Result<(), DispatchError> {
        let session = self.session().await?;
        match self.create_record(&session, record).await {
            Ok(()) => Ok(()),
            Err(PostError::Dispatch(e)) => Err(e),
            Err(PostError::SessionRejected) => {
                debug!("bluesky session rejected, logging in again");
                self.drop_session(&session).await;
                let session = self.session().await?;
                match self.create_record(&session, record).await {
                    Ok(()) => Ok(()),
                    Err(PostError::Dispatch(e)) => Err(e),
                    Err(PostError::SessionRejected) => Err(DispatchError::Permanent(
                        "bluesky rejected a freshly created session".to_string(),
                    )),
                }
            }
        }
    }
}

#[async_trait]
impl NotificationDispatcher for BlueskyDispatcher {
    fn name(&self) -> &'static str {
        "bluesky"
    }

    async fn send(&self, event: &NotificationEvent) -> DispatchResult {
        let text = self.templates.render_limited(event, POST_LIMIT);
        let record = Self::build_record(&text, &event.url);

        let result = self.retry.run(self.name(), || self.post(&record)).await;
        if result.is_ok() {
            debug!(channel = %event.channel.key(), "bluesky post created");
        }
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mockito::Matcher;
    use stream_platforms::{Channel, Platform};

    fn event() -> NotificationEvent {
        NotificationEvent {
            channel: Channel::new(Platform::YouTube, "@creator", "Créator"),
            session_id: "dQw4w9WgXcQ".into(),
            title: Some("Late night coding".into()),
            url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
            started_at: None,
            category: None,
            viewer_count: None,
        }
    }

    fn dispatcher(server: &mockito::ServerGuard) -> BlueskyDispatcher {
        let config = BlueskyConfig {
            enabled: true,
            service_url: server.url(),
            handle: Some("@daemon.bsky.social".into()),
            app_password: Some("app-pass".into()),
            ..Default::default()
        };
        BlueskyDispatcher::new(
            stream_platforms::client::create_client(None).unwrap(),
            &config,
            Arc::new(MessageTemplates::default()),
            RetryPolicy::new(3).with_base_delay(Duration::from_millis(1)),
        )
        .unwrap()
    }

    fn session_body(jwt: &str) -> String {
        json!({
            "accessJwt": jwt,
            "refreshJwt": "refresh",
            "did": "did:plc:abc123",
            "handle": "daemon.bsky.social"
        })
        .to_string()
    }

    #[test]
    fn test_link_facet_uses_byte_offsets() {
        let text = "Créator is live: https://x.y";
        let record = BlueskyDispatcher::build_record(text, "https://x.y");
        let index = &record["facets"][0]["index"];
        // "é" is two bytes, so the byte offset is one past the char offset.
        assert_eq!(index["byteStart"], 18);
        assert_eq!(index["byteEnd"], 29);
        assert_eq!(record["facets"][0]["features"][0]["uri"], "https://x.y");
    }

    #[tokio::test]
    async fn test_session_reused_across_posts() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/xrpc/com.atproto.server.createSession")
            .match_body(Matcher::PartialJson(json!({
                "identifier": "daemon.bsky.social",
                "password": "app-pass"
            })))
            .with_status(200)
            .with_body(session_body("jwt-1"))
            .expect(1)
            .create_async()
            .await;
        let post = server
            .mock("POST", "/xrpc/com.atproto.repo.createRecord")
            .match_header("authorization", "Bearer jwt-1")
            .match_body(Matcher::PartialJson(json!({
                "repo": "did:plc:abc123",
                "collection": "app.bsky.feed.post"
            })))
            .with_status(200)
            .with_body(r#"{"uri":"at://did:plc:abc123/app.bsky.feed.post/1","cid":"x"}"#)
            .expect(2)
            .create_async()
            .await;

        let dispatcher = dispatcher(&server);
        assert!(dispatcher.send(&event()).await.is_delivered());
        assert!(dispatcher.send(&event()).await.is_delivered());

        login.assert_async().await;
        post.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_session_recreated() {
        let mut server = mockito::Server::new_async().await;
        let logins = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = logins.clone();
        let _login = server
            .mock("POST", "/xrpc/com.atproto.server.createSession")
            .with_status(200)
            .with_body_from_request(move |_| {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                session_body(&format!("jwt-{n}")).into_bytes()
            })
            .create_async()
            .await;
        let expired = server
            .mock("POST", "/xrpc/com.atproto.repo.createRecord")
            .match_header("authorization", "Bearer jwt-1")
            .with_status(400)
            .with_body(r#"{"error":"ExpiredToken","message":"Token has expired"}"#)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/xrpc/com.atproto.repo.createRecord")
            .match_header("authorization", "Bearer jwt-2")
            .with_status(200)
            .with_body(r#"{"uri":"at://x","cid":"y"}"#)
            .expect(1)
            .create_async()
            .await;

        let result = dispatcher(&server).send(&event()).await;
        assert_eq!(result, DispatchResult::Delivered);
        assert_eq!(logins.load(std::sync::atomic::Ordering::SeqCst), 2);
        expired.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn test_bad_password_fails() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/xrpc/com.atproto.server.createSession")
            .with_status(401)
            .with_body(r#"{"error":"AuthenticationRequired","message":"Invalid identifier or password"}"#)
            .expect(1)
            .create_async()
            .await;

        let result = dispatcher(&server).send(&event()).await;
        assert!(matches!(result, DispatchResult::Failed(_)));
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_long_post_fits_limit_with_valid_facet() {
        let mut server = mockito::Server::new_async().await;
        let body = Arc::new(parking_lot::Mutex::new(String::new()));
        let captured = body.clone();
        let _login = server
            .mock("POST", "/xrpc/com.atproto.server.createSession")
            .with_status(200)
            .with_body(session_body("jwt-1"))
            .create_async()
            .await;
        let _post = server
            .mock("POST", "/xrpc/com.atproto.repo.createRecord")
            .with_status(200)
            .with_body_from_request(move |request| {
                *captured.lock() = String::from_utf8_lossy(request.body().unwrap()).into_owned();
                br#"{"uri":"at://x","cid":"y"}"#.to_vec()
            })
            .create_async()
            .await;

        let mut long = event();
        long.title = Some("é".repeat(800));
        assert!(dispatcher(&server).send(&long).await.is_delivered());

        let sent: serde_json::Value = serde_json::from_str(&body.lock()).unwrap();
        let text = sent["record"]["text"].as_str().unwrap();
        assert!(text.chars().count() <= POST_LIMIT);
        assert!(text.ends_with(&long.url));

        let index = &sent["record"]["facets"][0]["index"];
        let start = index["byteStart"].as_u64().unwrap() as usize;
        let end = index["byteEnd"].as_u64().unwrap() as usize;
        assert_eq!(&text.as_bytes()[start..end], long.url.as_bytes());
    }
}
