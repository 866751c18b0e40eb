//! Discord webhook destination.
//!
//! Posts one embed per event. Discord's rate limits are honored through the
//! `Retry-After` header on 429 responses.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use stream_platforms::Platform;
use tracing::debug;

use super::{DispatchResult, NotificationDispatcher};
use crate::config::DiscordConfig;
use crate::monitor::NotificationEvent;
use crate::notification::retry::{DispatchError, RetryPolicy, classify_response};
use crate::notification::template::MessageTemplates;

/// Discord message content limit.
const CONTENT_LIMIT: usize = 2000;
/// Discord embed title limit.
const TITLE_LIMIT: usize = 256;

pub struct DiscordDispatcher {
    client: Client,
    config: DiscordConfig,
    templates: Arc<MessageTemplates>,
    retry: RetryPolicy,
}

impl DiscordDispatcher {
    pub fn new(
        client: Client,
        config: DiscordConfig,
        templates: Arc<MessageTemplates>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            config,
            templates,
            retry,
        }
    }

    fn color(platform: Platform) -> u32 {
        match platform {
            Platform::Twitch => 0x9146ff,
            Platform::YouTube => 0xff0000,
            Platform::Kick => 0x53fc18,
        }
    }

    fn build_payload(&self, event: &NotificationEvent) -> serde_json::Value {
        let platform = event.channel.platform;
        let role = self.config.roles.get(&platform).map(|r| r.trim());

        let message = self.templates.render(event);
        let content = match role {
            Some(role) if !role.is_empty() => format!("<@&{role}> {message}"),
            _ => message,
        };
        let content =
            crate::notification::template::truncate_keeping_url(&content, &event.url, CONTENT_LIMIT);

        let title = event
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| format!("{} is live", event.channel.display_name));

        let mut fields = Vec::new();
        if let Some(category) = &event.category {
            fields.push(json!({ "name": "Category", "value": category, "inline": true }));
        }
        if let Some(viewers) = event.viewer_count {
            fields.push(json!({ "name": "Viewers", "value": viewers.to_string(), "inline": true }));
        }

        let mut embed = json!({
            "title": title.chars().take(TITLE_LIMIT).collect::<String>(),
            "url": event.url,
            "color": Self::color(platform),
            "author": { "name": event.channel.display_name },
            "footer": { "text": platform.display_name() },
            "fields": fields,
        });
        if let Some(started_at) = event.started_at {
            embed["timestamp"] = json!(started_at.to_rfc3339());
        }

        let mut payload = json!({
            "content": content,
            "embeds": [embed],
            "allowed_mentions": {
                "parse": [],
                "roles": role.filter(|r| !r.is_empty()).into_iter().collect::<Vec<_>>(),
            },
        });
        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }

        payload
    }

    async fn post(&self, webhook: &str, payload: &serde_json::Value) -> Result<(), DispatchError> {
        let response = self.client.post(webhook).json(payload).send().await?;
        classify_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for DiscordDispatcher {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, event: &NotificationEvent) -> DispatchResult {
        let Some(webhook) = self.config.webhook_for(event.channel.platform) else {
            return DispatchResult::Failed(format!(
                "no webhook configured for {}",
                event.channel.platform
            ));
        };

        let payload = self.build_payload(event);
        let result = self
            .retry
            .run(self.name(), || self.post(webhook, &payload))
            .await;

        if result.is_ok() {
            debug!(channel = %event.channel.key(), "discord notification sent");
        }
        result.into()
    }
}
