//! Per-channel rate-limit backoff.
//!
//! When a platform answers 429 for one channel, only that channel is suspended;
//! every other channel served by the same checker keeps polling.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Suspension applied when the platform does not say how long to wait.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Upper bound on any server-provided wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);

#[derive(Debug)]
pub struct ChannelBackoff {
    until: Mutex<FxHashMap<String, Instant>>,
    default_backoff: Duration,
}

impl Default for ChannelBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF)
    }
}

impl ChannelBackoff {
    pub fn new(default_backoff: Duration) -> Self {
        Self {
            until: Mutex::new(FxHashMap::default()),
            default_backoff,
        }
    }

    /// Time left before `channel_key` may be checked again, if it is suspended.
    pub fn remaining(&self, channel_key: &str) -> Option<Duration> {
        let mut until = self.until.lock();
        let deadline = *until.get(channel_key)?;
        let now = Instant::now();
        if now >= deadline {
            until.remove(channel_key);
            debug!(channel = channel_key, "rate-limit backoff elapsed");
            None
        } else {
            Some(deadline - now)
        }
    }

    /// Suspend `channel_key`. Returns the applied backoff.
    pub fn suspend(&self, channel_key: &str, retry_after: Option<Duration>) -> Duration {
        let backoff = retry_after
            .filter(|d| !d.is_zero())
            .unwrap_or(self.default_backoff)
            .min(MAX_BACKOFF);
        self.until
            .lock()
            .insert(channel_key.to_string(), Instant::now() + backoff);
        warn!(channel = channel_key, backoff = ?backoff, "rate limited, suspending channel checks");
        backoff
    }
}

/// Parse how long to wait from a 429 response.
///
/// Understands `Retry-After` (seconds) and Twitch's `Ratelimit-Reset` (unix time).
/// The result never exceeds [`MAX_BACKOFF`].
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(value) = headers.get(reqwest::header::RETRY_AFTER)
        && let Ok(secs) = value.to_str().unwrap_or_default().trim().parse::<f64>()
        && secs >= 0.0
    {
        return Duration::try_from_secs_f64(secs.min(MAX_BACKOFF.as_secs_f64())).ok();
    }

    if let Some(value) = headers.get("Ratelimit-Reset")
        && let Ok(reset_at) = value.to_str().unwrap_or_default().trim().parse::<u64>()
    {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let wait = Duration::from_secs(reset_at.saturating_sub(now).max(1));
        return Some(wait.min(MAX_BACKOFF));
    }

    None
}
