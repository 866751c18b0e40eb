pub mod kick;
pub mod twitch;
pub mod youtube;

pub use kick::KickChecker;
pub use twitch::TwitchChecker;
pub use youtube::YouTubeChecker;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Response, StatusCode};

use crate::backoff::parse_retry_after;
use crate::error::PlatformError;

/// Parse the timestamp formats the supported APIs emit.
///
/// Placeholder dates before 1970 (Kick reports `0001-01-01T00:00:00Z` for offline
/// channels) are treated as absent.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let parsed = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })?;

    (parsed.timestamp() > 0).then_some(parsed)
}

/// Map the statuses every API treats the same way; pass successes through.
pub(crate) async fn check_response(response: Response) -> Result<Response, PlatformError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED => Err(PlatformError::TokenRejected),
        StatusCode::TOO_MANY_REQUESTS => Err(PlatformError::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        }),
        _ => Err(PlatformError::from_response(response).await),
    }
}

/// Interpret the response of an OAuth client-credentials token request.
pub(crate) async fn check_token_response(response: Response) -> Result<Response, PlatformError> {
    match response.status() {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(PlatformError::AuthenticationFailed(format!("{status}: {body}")))
        }
        _ => check_response(response).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_timestamp("2024-05-01T18:30:00Z").unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.hour(), 18);
    }

    #[test]
    fn test_parse_space_separated() {
        let ts = parse_timestamp("2024-05-01 18:30:00").unwrap();
        assert_eq!(ts.minute(), 30);
    }

    #[test]
    fn test_placeholder_date_is_absent() {
        assert_eq!(parse_timestamp("0001-01-01T00:00:00Z"), None);
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
