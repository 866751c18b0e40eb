//! Per-channel poll tasks.
//!
//! Every channel gets its own task that loops `check → observe → persist →
//! dispatch` on its platform's interval. Observations for one channel are
//! therefore strictly ordered while channels never wait on each other.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use stream_platforms::{Channel, CredentialSet, PlatformChecker, StreamStatus, UnknownReason};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::monitor::{LiveStateStore, NotificationEvent, StateTracker};
use crate::notification::NotificationService;

/// Timeouts applied by the poller.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Upper bound for a single status check.
    pub check_timeout: Duration,
    /// Grace period for in-flight work after cancellation.
    pub shutdown_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_secs(20),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// One monitored channel and everything needed to check it.
struct PollTarget {
    channel: Channel,
    checker: Arc<dyn PlatformChecker>,
    credentials: Arc<CredentialSet>,
    interval: Duration,
}

/// State shared by all poll tasks.
struct PollContext {
    tracker: StateTracker,
    states: Arc<LiveStateStore>,
    notifications: Arc<NotificationService>,
    check_timeout: Duration,
    cycles: DashMap<String, u64>,
}

impl PollContext {
    fn next_cycle(&self, channel: &Channel) -> u64 {
        let mut cycle = self.cycles.entry(channel.key()).or_insert(0);
        *cycle += 1;
        *cycle
    }

    /// Run one poll of `target`. Returns the event that was dispatched, if any.
    ///
    /// A check abandoned because of cancellation leaves the stored state
    /// untouched.
    async fn poll(
        &self,
        target: &PollTarget,
        cancel: &CancellationToken,
    ) -> Option<NotificationEvent> {
        let channel = &target.channel;
        let cycle = self.next_cycle(channel);

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(channel = %channel.key(), "check abandoned on shutdown");
                return None;
            }
            result = tokio::time::timeout(
                self.check_timeout,
                target.checker.check(channel, &target.credentials),
            ) => result.unwrap_or_else(|_| {
                warn!(
                    channel = %channel.key(),
                    timeout = ?self.check_timeout,
                    "status check timed out"
                );
                StreamStatus::Unknown(UnknownReason::Timeout)
            }),
        };
        debug!(channel = %channel.key(), cycle, status = status.summary(), "checked");

        let previous = self.states.get(channel);
        let (next, event) = self.tracker.observe(&previous, &status, cycle);
        self.states.put(next);

        let event = event?;
        if self.notifications.is_empty() {
            warn!(channel = %channel.key(), "stream went live but no destinations are configured");
        } else {
            self.notifications.dispatch(&event).await;
        }
        Some(event)
    }
}

/// Drives the poll tasks of all monitored channels.
pub struct Poller {
    context: Arc<PollContext>,
    targets: Vec<Arc<PollTarget>>,
    shutdown_timeout: Duration,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(
        tracker: StateTracker,
        notifications: Arc<NotificationService>,
        config: PollerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            context: Arc::new(PollContext {
                tracker,
                states: Arc::new(LiveStateStore::new()),
                notifications,
                check_timeout: config.check_timeout,
                cycles: DashMap::new(),
            }),
            targets: Vec::new(),
            shutdown_timeout: config.shutdown_timeout,
            cancel,
        }
    }

    /// Monitor `channel` with `checker` every `interval`.
    pub fn add_channel(
        &mut self,
        channel: Channel,
        checker: Arc<dyn PlatformChecker>,
        credentials: Arc<CredentialSet>,
        interval: Duration,
    ) {
        self.targets.push(Arc::new(PollTarget {
            channel,
            checker,
            credentials,
            interval,
        }));
    }

    pub fn channel_count(&self) -> usize {
        self.targets.len()
    }

    pub fn states(&self) -> &Arc<LiveStateStore> {
        &self.context.states
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Poll every channel exactly once, concurrently, and return the events
    /// that were dispatched.
    pub async fn run_once(&self) -> Vec<NotificationEvent> {
        let mut tasks = JoinSet::new();
        for target in &self.targets {
            let context = self.context.clone();
            let target = target.clone();
            let cancel = self.cancel.clone();
            tasks.spawn(async move { context.poll(&target, &cancel).await });
        }

        let mut events = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => error!(error = %e, "poll task failed"),
            }
        }
        events
    }

    /// Poll every channel on its interval until the cancellation token fires,
    /// then give in-flight work `shutdown_timeout` to finish.
    pub async fn run(&self) {
        let mut tasks = JoinSet::new();
        for target in &self.targets {
            let context = self.context.clone();
            let target = target.clone();
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let mut ticker = tokio::time::interval(target.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    context.poll(&target, &cancel).await;
                }
                debug!(channel = %target.channel.key(), "poll task stopped");
            });
        }
        info!(channels = tasks.len(), "polling started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = tasks.join_next() => match result {
                    Some(Ok(())) => {}
                    Some(Err(e)) => error!(error = %e, "poll task terminated unexpectedly"),
                    None => {
                        warn!("no poll tasks left");
                        return;
                    }
                },
            }
        }

        info!(
            pending = tasks.len(),
            timeout = ?self.shutdown_timeout,
            "shutting down poll tasks"
        );
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        while !tasks.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(remaining = tasks.len(), "shutdown timeout reached, aborting poll tasks");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
                result = tasks.join_next() => {
                    if let Some(Err(e)) = result
                        && !e.is_cancelled()
                    {
                        warn!(error = %e, "poll task failed during shutdown");
                    }
                }
            }
        }
        info!("polling stopped");
    }
}
