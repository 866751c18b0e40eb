//! Mastodon status destination.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use super::{DispatchResult, NotificationDispatcher};
use crate::config::MastodonConfig;
use crate::monitor::NotificationEvent;
use crate::notification::retry::{DispatchError, RetryPolicy, classify_response};
use crate::notification::template::MessageTemplates;

/// Default status length limit of a Mastodon instance.
const STATUS_LIMIT: usize = 500;

pub struct MastodonDispatcher {
    client: Client,
    instance_url: String,
    access_token: String,
    visibility: String,
    templates: Arc<MessageTemplates>,
    retry: RetryPolicy,
}

impl MastodonDispatcher {
    /// Returns `None` when the instance URL or access token is missing.
    pub fn new(
        client: Client,
        config: &MastodonConfig,
        templates: Arc<MessageTemplates>,
        retry: RetryPolicy,
    ) -> Option<Self> {
        let instance_url = config.instance_url.as_deref()?.trim_end_matches('/');
        let access_token = config.access_token.as_deref()?;
        Some(Self {
            client,
            instance_url: instance_url.to_string(),
            access_token: access_token.to_string(),
            visibility: config.visibility.clone(),
            templates,
            retry,
        })
    }

    async fn post(&self, event: &NotificationEvent, status: &str) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(format!("{}/api/v1/statuses", self.instance_url))
            .bearer_auth(&self.access_token)
            // Retried requests with the same key create one status only.
            .header("Idempotency-Key", event.dedupe_key())
            .json(&json!({
                "status": status,
                "visibility": self.visibility,
            }))
            .send()
            .await?;
        classify_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for MastodonDispatcher {
    fn name(&self) -> &'static str {
        "mastodon"
    }

    async fn send(&self, event: &NotificationEvent) -> DispatchResult {
        let status = self.templates.render_limited(event, STATUS_LIMIT);
        let result = self
            .retry
            .run(self.name(), || self.post(event, &status))
            .await;

        if result.is_ok() {
            debug!(channel = %event.channel.key(), "mastodon status posted");
        }
        result.into()
    }
}
