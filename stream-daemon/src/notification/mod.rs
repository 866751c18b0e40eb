//! Live notifications.
//!
//! A [`NotificationEvent`](crate::monitor::NotificationEvent) is rendered
//! through [`MessageTemplates`] and handed to every [`NotificationDispatcher`]
//! by the [`NotificationService`].

pub mod channels;
pub mod retry;
pub mod service;
pub mod template;

pub use channels::{
    BlueskyDispatcher, DiscordDispatcher, DispatchResult, MastodonDispatcher,
    NotificationDispatcher,
};
pub use retry::{DispatchError, RetryPolicy};
pub use service::NotificationService;
pub use template::MessageTemplates;
