use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use super::channels::{DispatchResult, NotificationDispatcher};
use crate::monitor::NotificationEvent;

/// Fans an event out to every configured destination.
#[derive(Clone, Default)]
pub struct NotificationService {
    dispatchers: Vec<Arc<dyn NotificationDispatcher>>,
}

impl NotificationService {
    pub fn new(dispatchers: Vec<Arc<dyn NotificationDispatcher>>) -> Self {
        Self { dispatchers }
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }

    pub fn destinations(&self) -> Vec<&'static str> {
        self.dispatchers.iter().map(|d| d.name()).collect()
    }

    /// Send `event` to all destinations concurrently. A failing destination
    /// never affects the others.
    pub async fn dispatch(&self, event: &NotificationEvent) -> Vec<(&'static str, DispatchResult)> {
        let sends = self.dispatchers.iter().map(|dispatcher| async move {
            let result = dispatcher.send(event).await;
            (dispatcher.name(), result)
        });
        let results = join_all(sends).await;

        for (destination, result) in &results {
            match result {
                DispatchResult::Delivered => info!(
                    destination,
                    channel = %event.channel.key(),
                    session = %event.session_id,
                    "notification delivered"
                ),
                DispatchResult::Failed(reason) => warn!(
                    destination,
                    channel = %event.channel.key(),
                    session = %event.session_id,
                    %reason,
                    "notification failed"
                ),
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use stream_platforms::{Channel, Platform};

    struct Recording {
        name: &'static str,
        result: DispatchResult,
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    impl Recording {
        fn new(name: &'static str, result: DispatchResult, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                result,
                delay,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NotificationDispatcher for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn send(&self, event: &NotificationEvent) -> DispatchResult {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().push(event.session_id.clone());
            self.result.clone()
        }
    }

    fn event() -> NotificationEvent {
        NotificationEvent {
            channel: Channel::from_identifier(Platform::Twitch, "somestreamer"),
            session_id: "S1".into(),
            title: None,
            url: "https://www.twitch.tv/somestreamer".into(),
            started_at: None,
            category: None,
            viewer_count: None,
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_destinations() {
        let discord = Recording::new(
            "discord",
            DispatchResult::Failed("404 Not Found".into()),
            Duration::ZERO,
        );
        let mastodon = Recording::new("mastodon", DispatchResult::Delivered, Duration::ZERO);
        let service = NotificationService::new(vec![discord.clone(), mastodon.clone()]);

        let results = service.dispatch(&event()).await;

        assert_eq!(
            results,
            vec![
                ("discord", DispatchResult::Failed("404 Not Found".into())),
                ("mastodon", DispatchResult::Delivered),
            ]
        );
        assert_eq!(*mastodon.seen.lock(), vec!["S1".to_string()]);
        assert_eq!(*discord.seen.lock(), vec!["S1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_is_concurrent() {
        let slow_a = Recording::new("a", DispatchResult::Delivered, Duration::from_secs(5));
        let slow_b = Recording::new("b", DispatchResult::Delivered, Duration::from_secs(5));
        let service = NotificationService::new(vec![slow_a, slow_b]);

        let started = tokio::time::Instant::now();
        service.dispatch(&event()).await;
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_no_destinations() {
        let service = NotificationService::default();
        assert!(service.is_empty());
        assert!(service.dispatch(&event()).await.is_empty());
    }
}
