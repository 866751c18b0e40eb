//! Live-state tracking and transition detection.
//!
//! [`StateTracker::observe`] is a pure function of the previous [`LiveState`]
//! and the latest [`StreamStatus`]. It decides whether the observation is a new
//! stream worth announcing:
//!
//! - `Unknown` never changes anything, not even `last_checked`.
//! - `Offline` clears the session.
//! - `Live` announces a session at most once, even across offline blips that
//!   report the same session again.
//! - Platforms that report no session id get a synthetic one derived from the
//!   poll cycle in which the channel went live.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use stream_platforms::{Channel, LiveStream, StreamStatus};
use tracing::{debug, info};

/// Last known state of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveState {
    pub channel: Channel,
    pub is_live: bool,
    pub session_id: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    /// Whether `session_id` was made up locally because the platform gave none.
    pub session_is_synthetic: bool,
    /// Last session that was announced (or deliberately skipped at startup).
    pub notified_session: Option<String>,
    /// Whether a definitive observation was made since the daemon started.
    pub primed: bool,
}

impl LiveState {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            is_live: false,
            session_id: None,
            last_checked: None,
            session_is_synthetic: false,
            notified_session: None,
            primed: false,
        }
    }
}

/// A channel went live. Produced once per session, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEvent {
    pub channel: Channel,
    pub session_id: String,
    pub title: Option<String>,
    pub url: String,
    pub started_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub viewer_count: Option<u64>,
}

impl NotificationEvent {
    fn new(channel: Channel, session_id: String, stream: &LiveStream) -> Self {
        Self {
            channel,
            session_id,
            title: stream.title.clone(),
            url: stream.url.clone(),
            started_at: stream.started_at,
            category: stream.category.clone(),
            viewer_count: stream.viewer_count,
        }
    }

    /// Stable identifier of the announced session across destinations.
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.channel.key(), self.session_id)
    }
}

/// Session id for a stream whose platform reports none.
pub fn synthetic_session_id(cycle: u64) -> String {
    format!("cycle-{cycle}")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StateTracker {
    notify_live_on_startup: bool,
}

impl StateTracker {
    pub fn new(notify_live_on_startup: bool) -> Self {
        Self {
            notify_live_on_startup,
        }
    }

    /// Fold `current`, observed during poll `cycle`, into `previous`.
    pub fn observe(
        &self,
        previous: &LiveState,
        current: &StreamStatus,
        cycle: u64,
    ) -> (LiveState, Option<NotificationEvent>) {
        self.observe_at(previous, current, cycle, Utc::now())
    }

    pub fn observe_at(
        &self,
        previous: &LiveState,
        current: &StreamStatus,
        cycle: u64,
        now: DateTime<Utc>,
    ) -> (LiveState, Option<NotificationEvent>) {
        let stream = match current {
            StreamStatus::Unknown(reason) => {
                debug!(channel = %previous.channel.key(), %reason, "status unknown, keeping state");
                return (previous.clone(), None);
            }
            StreamStatus::Offline => {
                let mut next = previous.clone();
                if previous.is_live {
                    info!(channel = %previous.channel.key(), "stream ended");
                }
                next.is_live = false;
                next.session_id = None;
                next.session_is_synthetic = false;
                next.last_checked = Some(now);
                next.primed = true;
                return (next, None);
            }
            StreamStatus::Live(stream) => stream,
        };

        let mut next = previous.clone();
        next.last_checked = Some(now);
        next.primed = true;
        next.is_live = true;

        let reported = stream.session_id.as_deref().filter(|s| !s.is_empty());

        // The platform started reporting an id for a stream we already track
        // under a synthetic one: adopt it silently.
        if previous.is_live
            && previous.session_is_synthetic
            && let Some(id) = reported
        {
            if previous.notified_session == previous.session_id {
                next.notified_session = Some(id.to_string());
            }
            next.session_id = Some(id.to_string());
            next.session_is_synthetic = false;
            return (next, None);
        }

        let (session, synthetic) = match (reported, &previous.session_id) {
            (Some(id), _) => (id.to_string(), false),
            // Continuously live without an id in this response: same stream.
            (None, Some(current)) if previous.is_live => {
                (current.clone(), previous.session_is_synthetic)
            }
            (None, _) => (synthetic_session_id(cycle), true),
        };

        let changed = !previous.is_live || previous.session_id.as_deref() != Some(session.as_str());
        next.session_id = Some(session.clone());
        next.session_is_synthetic = synthetic;

        if !changed {
            return (next, None);
        }
        if previous.notified_session.as_deref() == Some(session.as_str()) {
            debug!(channel = %previous.channel.key(), session = %session, "session already announced");
            return (next, None);
        }

        next.notified_session = Some(session.clone());

        if !previous.primed && !self.notify_live_on_startup {
            info!(
                channel = %previous.channel.key(),
                session = %session,
                "channel already live at startup, not announcing"
            );
            return (next, None);
        }

        info!(channel = %previous.channel.key(), session = %session, "stream went live");
        let event = NotificationEvent::new(previous.channel.clone(), session, stream);
        (next, Some(event))
    }
}

/// Owned store of the last known state of every channel.
#[derive(Debug, Default)]
pub struct LiveStateStore {
    states: DashMap<String, LiveState>,
}

impl LiveStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `channel`, or a fresh offline state if never observed.
    pub fn get(&self, channel: &Channel) -> LiveState {
        self.states
            .get(&channel.key())
            .map(|s| s.value().clone())
            .unwrap_or_else(|| LiveState::new(channel.clone()))
    }

    pub fn put(&self, state: LiveState) {
        self.states.insert(state.channel.key(), state);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Copy of every tracked state, ordered by channel key.
    pub fn snapshot(&self) -> Vec<LiveState> {
        let mut states: Vec<LiveState> = self.states.iter().map(|e| e.value().clone()).collect();
        states.sort_by_key(|s| s.channel.key());
        states
    }
}
