//! Notification destinations.
//!
//! - Discord webhooks
//! - Mastodon statuses
//! - Bluesky posts

mod bluesky;
mod discord;
mod mastodon;

pub use bluesky::BlueskyDispatcher;
pub use discord::DiscordDispatcher;
pub use mastodon::MastodonDispatcher;

use std::fmt;

use async_trait::async_trait;

use crate::monitor::NotificationEvent;

/// Outcome of delivering one event to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Delivered,
    Failed(String),
}

impl DispatchResult {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

impl fmt::Display for DispatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => f.write_str("delivered"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

impl<E: fmt::Display> From<Result<(), E>> for DispatchResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Delivered,
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

/// Sends live notifications to one destination.
///
/// Implementations retry internally and never return an error; failures are
/// reported as [`DispatchResult::Failed`].
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Destination name used in logs.
    fn name(&self) -> &'static str;

    async fn send(&self, event: &NotificationEvent) -> DispatchResult;
}
