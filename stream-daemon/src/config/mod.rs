//! Daemon configuration, loaded from a TOML file.
//!
//! Destination secrets may be left out of the file and supplied by the secret
//! store instead (see [`DiscordConfig::apply_secrets`] and friends). Static
//! checks run in [`AppConfig::validate`]; checks that depend on resolved secrets
//! run in [`AppConfig::validate_destinations`].

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use stream_platforms::{Channel, CredentialSet, Platform};
use url::Url;

use crate::{Error, Result};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "stream-daemon.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub daemon: DaemonConfig,
    pub secrets: SecretsConfig,
    pub platforms: BTreeMap<Platform, PlatformConfig>,
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Upper bound for a single status check.
    pub check_timeout_secs: u64,
    /// Grace period for in-flight work on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Announce channels that are already live when the daemon starts.
    pub notify_live_on_startup: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            check_timeout_secs: 20,
            shutdown_timeout_secs: 10,
            notify_live_on_startup: false,
        }
    }
}

impl DaemonConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretBackend {
    Doppler,
    #[default]
    Env,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    pub backend: SecretBackend,
    /// Environment variable holding the secret store token.
    pub token_env: String,
    pub project: Option<String>,
    pub config: Option<String>,
    /// Overrides the secret store API base URL.
    pub api_url: Option<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretBackend::Env,
            token_env: "DOPPLER_TOKEN".to_string(),
            project: None,
            config: None,
            api_url: None,
        }
    }
}

/// A configured channel: either a bare identifier or a table with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChannelEntry {
    Id(String),
    Detailed { id: String, name: Option<String> },
}

impl ChannelEntry {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Detailed { id, .. } => id.trim(),
        }
    }

    fn to_channel(&self, platform: Platform) -> Channel {
        match self {
            Self::Detailed {
                name: Some(name), ..
            } if !name.trim().is_empty() => Channel::new(platform, self.id(), name.trim()),
            _ => Channel::from_identifier(platform, self.id()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    pub enabled: bool,
    pub channels: Vec<ChannelEntry>,
    /// Secret name prefix; defaults to the upper-cased platform name.
    pub secret_prefix: Option<String>,
    pub poll_interval_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: Vec::new(),
            secret_prefix: None,
            poll_interval_secs: 60,
        }
    }
}

impl PlatformConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn secret_prefix(&self, platform: Platform) -> &str {
        self.secret_prefix
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(platform.default_secret_prefix())
    }

    pub fn channels(&self, platform: Platform) -> Vec<Channel> {
        self.channels
            .iter()
            .map(|entry| entry.to_channel(platform))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationsConfig {
    pub max_attempts: u32,
    /// Per-platform message templates with `{name}`, `{platform}`, `{title}`
    /// and `{url}` placeholders.
    pub templates: BTreeMap<Platform, String>,
    pub discord: DiscordConfig,
    pub mastodon: MastodonConfig,
    pub bluesky: BlueskyConfig,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            templates: BTreeMap::new(),
            discord: DiscordConfig::default(),
            mastodon: MastodonConfig::default(),
            bluesky: BlueskyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    /// Role id to mention, per platform.
    pub roles: BTreeMap<Platform, String>,
    /// Webhook overriding `webhook_url`, per platform.
    pub webhooks: BTreeMap<Platform, String>,
    pub username: Option<String>,
    pub secret_prefix: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            roles: BTreeMap::new(),
            webhooks: BTreeMap::new(),
            username: None,
            secret_prefix: "DISCORD".to_string(),
        }
    }
}

impl DiscordConfig {
    /// Fill unset fields from secrets resolved under `secret_prefix`.
    pub fn apply_secrets(&mut self, secrets: &CredentialSet) {
        fill(&mut self.webhook_url, secrets.get("webhook_url"));
        for platform in Platform::ALL {
            if let Some(url) = secrets.get(&format!("webhook_{}", platform.as_str())) {
                self.webhooks
                    .entry(platform)
                    .or_insert_with(|| url.to_string());
            }
            if let Some(role) = secrets.get(&format!("role_{}", platform.as_str())) {
                self.roles
                    .entry(platform)
                    .or_insert_with(|| role.to_string());
            }
        }
    }

    /// Webhook for events from `platform`.
    pub fn webhook_for(&self, platform: Platform) -> Option<&str> {
        self.webhooks
            .get(&platform)
            .map(String::as_str)
            .or(self.webhook_url.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MastodonConfig {
    pub enabled: bool,
    pub instance_url: Option<String>,
    pub access_token: Option<String>,
    pub visibility: String,
    pub secret_prefix: String,
}

impl Default for MastodonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instance_url: None,
            access_token: None,
            visibility: "public".to_string(),
            secret_prefix: "MASTODON".to_string(),
        }
    }
}

impl MastodonConfig {
    pub fn apply_secrets(&mut self, secrets: &CredentialSet) {
        fill(&mut self.instance_url, secrets.get("instance_url"));
        fill(&mut self.access_token, secrets.get("access_token"));
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlueskyConfig {
    pub enabled: bool,
    pub service_url: String,
    pub handle: Option<String>,
    pub app_password: Option<String>,
    pub secret_prefix: String,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_url: "https://bsky.social".to_string(),
            handle: None,
            app_password: None,
            secret_prefix: "BLUESKY".to_string(),
        }
    }
}

impl BlueskyConfig {
    pub fn apply_secrets(&mut self, secrets: &CredentialSet) {
        fill(&mut self.handle, secrets.get("handle"));
        fill(&mut self.app_password, secrets.get("app_password"));
    }
}

fn fill(slot: &mut Option<String>, value: Option<&str>) {
    let unset = slot.as_deref().is_none_or(|s| s.trim().is_empty());
    if unset && let Some(value) = value {
        *slot = Some(value.to_string());
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn check_url(what: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).map_err(|e| Error::config(format!("{what}: invalid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::config(format!("{what}: URL must use http or https")));
    }
    Ok(())
}

impl AppConfig {
    /// Read, parse and validate the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Enabled platforms that have at least one channel.
    pub fn active_platforms(&self) -> impl Iterator<Item = (Platform, &PlatformConfig)> {
        self.platforms
            .iter()
            .filter(|(_, cfg)| cfg.enabled && !cfg.channels.is_empty())
            .map(|(platform, cfg)| (*platform, cfg))
    }

    /// Checks that do not depend on the secret store.
    pub fn validate(&self) -> Result<()> {
        if self.active_platforms().next().is_none() {
            return Err(Error::config(
                "at least one enabled platform with at least one channel is required",
            ));
        }

        for (platform, cfg) in self.active_platforms() {
            if cfg.poll_interval_secs < 1 {
                return Err(Error::config(format!(
                    "platforms.{platform_key}.poll_interval_secs must be at least 1",
                    platform_key = platform.as_str()
                )));
            }

            let mut seen = HashSet::new();
            for entry in &cfg.channels {
                if entry.id().is_empty() {
                    return Err(Error::config(format!(
                        "platforms.{}.channels contains an empty identifier",
                        platform.as_str()
                    )));
                }
                if !seen.insert(entry.id().to_ascii_lowercase()) {
                    return Err(Error::config(format!(
                        "platforms.{}.channels lists '{}' more than once",
                        platform.as_str(),
                        entry.id()
                    )));
                }
            }
        }

        if self.daemon.check_timeout_secs < 1 {
            return Err(Error::config("daemon.check_timeout_secs must be at least 1"));
        }
        if self.notifications.max_attempts < 1 {
            return Err(Error::config("notifications.max_attempts must be at least 1"));
        }
        if self.secrets.backend == SecretBackend::Doppler && self.secrets.token_env.trim().is_empty()
        {
            return Err(Error::config("secrets.token_env must name an environment variable"));
        }

        Ok(())
    }

    /// Checks that enabled destinations have what they need, after secrets were applied.
    pub fn validate_destinations(&self) -> Result<()> {
        let n = &self.notifications;

        if n.discord.enabled {
            let webhooks: Vec<&str> = n
                .discord
                .webhook_url
                .as_deref()
                .into_iter()
                .chain(n.discord.webhooks.values().map(String::as_str))
                .collect();
            if webhooks.is_empty() {
                return Err(Error::config(
                    "notifications.discord is enabled but no webhook_url is configured",
                ));
            }
            for webhook in webhooks {
                check_url("notifications.discord webhook", webhook)?;
            }
        }

        if n.mastodon.enabled {
            if !present(&n.mastodon.instance_url) || !present(&n.mastodon.access_token) {
                return Err(Error::config(
                    "notifications.mastodon requires instance_url and access_token",
                ));
            }
            if let Some(url) = &n.mastodon.instance_url {
                check_url("notifications.mastodon.instance_url", url)?;
            }
        }

        if n.bluesky.enabled {
            if !present(&n.bluesky.handle) || !present(&n.bluesky.app_password) {
                return Err(Error::config(
                    "notifications.bluesky requires handle and app_password",
                ));
            }
            check_url("notifications.bluesky.service_url", &n.bluesky.service_url)?;
        }

        Ok(())
    }
}
