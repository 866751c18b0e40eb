//! Monitored channels and the platforms they live on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Supported streaming platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitch,
    YouTube,
    Kick,
}

impl Platform {
    /// All supported platforms, in display order.
    pub const ALL: [Platform; 3] = [Platform::Twitch, Platform::YouTube, Platform::Kick];

    /// Lower-case identifier used in configuration keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twitch => "twitch",
            Self::YouTube => "youtube",
            Self::Kick => "kick",
        }
    }

    /// Human-friendly platform name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Twitch => "Twitch",
            Self::YouTube => "YouTube",
            Self::Kick => "Kick",
        }
    }

    /// Default secret-store prefix for this platform's credentials.
    pub fn default_secret_prefix(&self) -> &'static str {
        match self {
            Self::Twitch => "TWITCH",
            Self::YouTube => "YOUTUBE",
            Self::Kick => "KICK",
        }
    }

    /// Whether a checker for this platform can run without credentials.
    pub fn supports_anonymous(&self) -> bool {
        matches!(self, Self::Kick)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitch" => Ok(Self::Twitch),
            "youtube" | "yt" => Ok(Self::YouTube),
            "kick" => Ok(Self::Kick),
            other => Err(PlatformError::UnsupportedPlatform(other.to_string())),
        }
    }
}

/// A monitored channel. Built from configuration at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub platform: Platform,
    /// Login, slug, handle or channel id, as the platform expects it.
    pub identifier: String,
    pub display_name: String,
}

impl Channel {
    pub fn new(
        platform: Platform,
        identifier: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            identifier: identifier.into(),
            display_name: display_name.into(),
        }
    }

    /// Channel whose display name is its identifier.
    pub fn from_identifier(platform: Platform, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            platform,
            display_name: identifier.clone(),
            identifier,
        }
    }

    /// Stable key, unique across platforms (e.g. `twitch:somestreamer`).
    pub fn key(&self) -> String {
        format!(
            "{}:{}",
            self.platform.as_str(),
            self.identifier.to_ascii_lowercase()
        )
    }

    /// Public page of the channel, used when the platform does not report a stream URL.
    pub fn page_url(&self) -> String {
        match self.platform {
            Platform::Twitch => format!("https://www.twitch.tv/{}", self.identifier),
            Platform::YouTube if self.identifier.starts_with('@') => {
                format!("https://www.youtube.com/{}/live", self.identifier)
            }
            Platform::YouTube => {
                format!("https://www.youtube.com/channel/{}/live", self.identifier)
            }
            Platform::Kick => format!("https://kick.com/{}", self.identifier),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.platform)
    }
}
