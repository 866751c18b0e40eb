//! The checker contract shared by every platform.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backoff::ChannelBackoff;
use crate::channel::{Channel, Platform};
use crate::credentials::CredentialSet;
use crate::error::PlatformError;
use crate::status::{StreamStatus, UnknownReason};

/// Queries one platform for the live status of a channel.
///
/// Implementations never fail: every error is folded into
/// [`StreamStatus::Unknown`] and logged, so a misbehaving platform can only ever
/// delay notifications, never crash the poll loop.
#[async_trait]
pub trait PlatformChecker: Send + Sync {
    /// Platform served by this checker.
    fn platform(&self) -> Platform;

    /// Whether the checker refuses to work without credentials.
    fn requires_credentials(&self) -> bool {
        !self.platform().supports_anonymous()
    }

    /// Check whether `channel` is live.
    async fn check(&self, channel: &Channel, credentials: &CredentialSet) -> StreamStatus;
}

/// Fold a failed query into the status reported to the caller.
///
/// Rate-limit responses suspend the channel in `backoff`.
pub(crate) fn status_from_error(
    channel: &Channel,
    error: PlatformError,
    backoff: &ChannelBackoff,
) -> StreamStatus {
    match error {
        PlatformError::RateLimited { retry_after } => {
            backoff.suspend(&channel.key(), retry_after);
            StreamStatus::Unknown(UnknownReason::RateLimited)
        }
        PlatformError::JsonError(e) => {
            warn!(channel = %channel.key(), error = %e, "could not parse platform response");
            StreamStatus::Unknown(UnknownReason::Invalid(e.to_string()))
        }
        PlatformError::ChannelNotFound(id) => {
            warn!(channel = %channel.key(), "channel not found on platform");
            StreamStatus::Unknown(UnknownReason::Invalid(format!("channel not found: {id}")))
        }
        e if e.is_transient() => {
            debug!(channel = %channel.key(), error = %e, "transient check failure");
            StreamStatus::Unknown(UnknownReason::Transient(e.to_string()))
        }
        e => {
            warn!(channel = %channel.key(), error = %e, "check failed");
            StreamStatus::Unknown(UnknownReason::Transient(e.to_string()))
        }
    }
}

/// Remembers that a checker gave up on a credential set after an auth failure.
///
/// Handing the checker a different credential set re-enables it.
#[derive(Debug, Default)]
pub(crate) struct DisableSwitch {
    disabled_for: Mutex<Option<u64>>,
}

impl DisableSwitch {
    pub fn is_disabled_for(&self, credentials: &CredentialSet) -> bool {
        *self.disabled_for.lock() == Some(credentials.fingerprint())
    }

    pub fn disable(&self, platform: Platform, credentials: &CredentialSet, error: &PlatformError) {
        let mut disabled_for = self.disabled_for.lock();
        let fingerprint = credentials.fingerprint();
        if *disabled_for != Some(fingerprint) {
            warn!(
                platform = platform.as_str(),
                error = %error,
                "authentication failed, disabling checks for this platform"
            );
            *disabled_for = Some(fingerprint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_limit_suspends_only_that_channel() {
        let backoff = ChannelBackoff::default();
        let a = Channel::from_identifier(Platform::Kick, "a");
        let b = Channel::from_identifier(Platform::Kick, "b");

        let status = status_from_error(
            &a,
            PlatformError::RateLimited {
                retry_after: Some(Duration::from_secs(5)),
            },
            &backoff,
        );

        assert_eq!(status, StreamStatus::Unknown(UnknownReason::RateLimited));
        assert!(backoff.remaining(&a.key()).is_some());
        assert!(backoff.remaining(&b.key()).is_none());
    }

    #[test]
    fn test_server_error_is_unknown_not_offline() {
        let backoff = ChannelBackoff::default();
        let channel = Channel::from_identifier(Platform::Twitch, "a");
        let status = status_from_error(
            &channel,
            PlatformError::UnexpectedStatus {
                status: 502,
                body: "bad gateway".into(),
            },
            &backoff,
        );
        assert!(status.is_unknown());
    }

    #[test]
    fn test_disable_switch_tracks_credentials() {
        let switch = DisableSwitch::default();
        let old: CredentialSet = [("api_key", "old")].into_iter().collect();
        let new: CredentialSet = [("api_key", "new")].into_iter().collect();

        switch.disable(
            Platform::YouTube,
            &old,
            &PlatformError::AuthenticationFailed("bad key".into()),
        );

        assert!(switch.is_disabled_for(&old));
        assert!(!switch.is_disabled_for(&new));
    }
}
