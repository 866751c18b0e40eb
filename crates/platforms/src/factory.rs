use std::sync::Arc;

use reqwest::Client;

use crate::channel::Platform;
use crate::checker::PlatformChecker;
use crate::platforms::{KickChecker, TwitchChecker, YouTubeChecker};

/// Base URLs of every platform API. Overridable so tests can point checkers at a
/// local mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub twitch_auth: String,
    pub twitch_api: String,
    pub youtube_api: String,
    pub kick_auth: String,
    pub kick_api: String,
    pub kick_public: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            twitch_auth: TwitchChecker::AUTH_URL.to_string(),
            twitch_api: TwitchChecker::API_URL.to_string(),
            youtube_api: YouTubeChecker::API_URL.to_string(),
            kick_auth: KickChecker::AUTH_URL.to_string(),
            kick_api: KickChecker::API_URL.to_string(),
            kick_public: KickChecker::PUBLIC_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Point every endpoint at the same base URL.
    pub fn all(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            twitch_auth: base.clone(),
            twitch_api: base.clone(),
            youtube_api: base.clone(),
            kick_auth: base.clone(),
            kick_api: base.clone(),
            kick_public: base,
        }
    }
}

/// Builds one checker per platform sharing a single HTTP client.
#[derive(Debug, Clone)]
pub struct CheckerFactory {
    client: Client,
    endpoints: Endpoints,
}

impl CheckerFactory {
    pub fn new(client: Client) -> Self {
        Self::with_endpoints(client, Endpoints::default())
    }

    pub fn with_endpoints(client: Client, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    pub fn create(&self, platform: Platform) -> Arc<dyn PlatformChecker> {
        let client = self.client.clone();
        let e = &self.endpoints;
        match platform {
            Platform::Twitch => Arc::new(TwitchChecker::with_urls(
                client,
                &e.twitch_auth,
                &e.twitch_api,
            )),
            Platform::YouTube => Arc::new(YouTubeChecker::with_url(client, &e.youtube_api)),
            Platform::Kick => Arc::new(KickChecker::with_urls(
                client,
                &e.kick_auth,
                &e.kick_api,
                &e.kick_public,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_matches_platform() {
        let factory = CheckerFactory::new(crate::client::create_client(None).unwrap());
        for platform in Platform::ALL {
            let checker = factory.create(platform);
            assert_eq!(checker.platform(), platform);
            assert_eq!(checker.requires_credentials(), platform != Platform::Kick);
        }
    }

    #[test]
    fn test_endpoint_override() {
        let endpoints = Endpoints::all("http://127.0.0.1:1234");
        assert_eq!(endpoints.kick_public, "http://127.0.0.1:1234");
        assert_ne!(endpoints, Endpoints::default());
    }
}
