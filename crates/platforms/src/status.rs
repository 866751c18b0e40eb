//! Normalized live status reported by every checker.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Details of a live broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStream {
    /// Platform identifier of this broadcast, if the platform exposes one.
    pub session_id: Option<String>,
    pub title: Option<String>,
    /// Where viewers can watch the stream.
    pub url: String,
    pub started_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub viewer_count: Option<u64>,
}

impl LiveStream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            session_id: None,
            title: None,
            url: url.into(),
            started_at: None,
            category: None,
            viewer_count: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Why a check could not determine the channel's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownReason {
    /// Timeout, connection failure or a 5xx/403 response.
    Transient(String),
    /// The platform answered 429; calls for this channel are suspended.
    RateLimited,
    /// Still inside a previous rate-limit backoff window.
    BackingOff,
    /// The check took longer than the caller allowed.
    Timeout,
    /// The check was abandoned because the daemon is shutting down.
    Cancelled,
    /// The checker was disabled after an authentication failure.
    Disabled,
    /// The response could not be interpreted.
    Invalid(String),
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "transient failure: {msg}"),
            Self::RateLimited => f.write_str("rate limited"),
            Self::BackingOff => f.write_str("backing off after rate limit"),
            Self::Timeout => f.write_str("timed out"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Disabled => f.write_str("checker disabled"),
            Self::Invalid(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

/// Result of a single status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    /// The channel is broadcasting.
    Live(LiveStream),
    /// The platform positively reported the channel as offline.
    Offline,
    /// The status could not be determined. Never treated as offline.
    Unknown(UnknownReason),
}

impl StreamStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    pub fn live(&self) -> Option<&LiveStream> {
        match self {
            Self::Live(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.live().and_then(|s| s.session_id.as_deref())
    }

    /// Short label for logs.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Live(_) => "live",
            Self::Offline => "offline",
            Self::Unknown(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        let live = StreamStatus::Live(LiveStream::new("https://kick.com/a").with_session("s1"));
        assert!(live.is_live());
        assert_eq!(live.session_id(), Some("s1"));
        assert_eq!(live.summary(), "live");

        assert!(StreamStatus::Offline.is_offline());
        assert_eq!(StreamStatus::Offline.session_id(), None);

        let unknown = StreamStatus::Unknown(UnknownReason::Timeout);
        assert!(unknown.is_unknown());
        assert!(!unknown.is_live());
        assert!(!unknown.is_offline());
    }
}
