//! Service container wiring the daemon together.
//!
//! Resolves credentials, builds one checker per platform and the enabled
//! notification destinations, and hands everything to the [`Poller`].

use std::sync::Arc;

use reqwest::Client;
use stream_platforms::{CheckerFactory, CredentialSet, Endpoints, Platform, client::create_client};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::monitor::{LiveStateStore, StateTracker};
use crate::notification::{
    BlueskyDispatcher, DiscordDispatcher, MastodonDispatcher, MessageTemplates,
    NotificationDispatcher, NotificationService, RetryPolicy,
};
use crate::scheduler::{Poller, PollerConfig};
use crate::secrets::{SecretError, SecretResolver, SecretStore, build_store};
use crate::{Error, Result};

/// Overrides used when building the container.
#[derive(Default)]
pub struct ContainerOptions {
    /// Platform API base URLs. Defaults to the public endpoints.
    pub endpoints: Option<Endpoints>,
    /// Secret store to use instead of the configured backend.
    pub secret_store: Option<Arc<dyn SecretStore>>,
}

/// Service container holding the running daemon's components.
pub struct ServiceContainer {
    /// Configuration with destination secrets applied.
    pub config: AppConfig,
    pub notifications: Arc<NotificationService>,
    pub poller: Arc<Poller>,
    cancellation_token: CancellationToken,
}

/// The secret resolver, or the reason the store could not be built.
struct Secrets {
    resolver: std::result::Result<SecretResolver, String>,
    backend: &'static str,
}

impl Secrets {
    async fn resolve(&self, prefix: &str) -> std::result::Result<CredentialSet, SecretError> {
        match &self.resolver {
            Ok(resolver) => resolver.resolve(prefix).await,
            Err(reason) => Err(SecretError::Unavailable {
                store: self.backend,
                reason: reason.clone(),
            }),
        }
    }
}

impl ServiceContainer {
    pub async fn new(config: AppConfig) -> Result<Self> {
        Self::with_options(config, ContainerOptions::default()).await
    }

    pub async fn with_options(mut config: AppConfig, options: ContainerOptions) -> Result<Self> {
        info!("Initializing service container");
        config.validate()?;

        let client = create_client(None)?;
        let cancellation_token = CancellationToken::new();

        let secrets = match options.secret_store {
            Some(store) => Secrets {
                backend: store.name(),
                resolver: Ok(SecretResolver::new(store)),
            },
            None => match build_store(&config.secrets, client.clone()) {
                Ok(store) => Secrets {
                    backend: store.name(),
                    resolver: Ok(SecretResolver::new(store)),
                },
                Err(e) => {
                    warn!(error = %e, "secret store unavailable");
                    Secrets {
                        backend: "secret store",
                        resolver: Err(e.to_string()),
                    }
                }
            },
        };

        Self::apply_destination_secrets(&mut config, &secrets).await;
        config.validate_destinations()?;

        let notifications = Arc::new(Self::build_notifications(&config, &client)?);
        if notifications.is_empty() {
            warn!("no notification destinations enabled, live streams will only be logged");
        } else {
            info!(destinations = ?notifications.destinations(), "notification destinations ready");
        }

        let factory = match options.endpoints {
            Some(endpoints) => CheckerFactory::with_endpoints(client.clone(), endpoints),
            None => CheckerFactory::new(client.clone()),
        };

        let mut poller = Poller::new(
            StateTracker::new(config.daemon.notify_live_on_startup),
            notifications.clone(),
            PollerConfig {
                check_timeout: config.daemon.check_timeout(),
                shutdown_timeout: config.daemon.shutdown_timeout(),
            },
            cancellation_token.clone(),
        );

        for (platform, platform_config) in config.active_platforms() {
            let checker = factory.create(platform);
            let prefix = platform_config.secret_prefix(platform);
            let credentials = Arc::new(
                Self::platform_credentials(
                    platform,
                    checker.requires_credentials(),
                    prefix,
                    &secrets,
                )
                .await?,
            );
            let channels = platform_config.channels(platform);

            info!(
                platform = %platform,
                channels = channels.len(),
                interval = ?platform_config.poll_interval(),
                credentials = credentials.len(),
                "monitoring platform"
            );
            for channel in channels {
                poller.add_channel(
                    channel,
                    checker.clone(),
                    credentials.clone(),
                    platform_config.poll_interval(),
                );
            }
        }

        Ok(Self {
            config,
            notifications,
            poller: Arc::new(poller),
            cancellation_token,
        })
    }

    /// Credentials for `platform`. A failing secret store is fatal only when
    /// its checker cannot run without credentials.
    async fn platform_credentials(
        platform: Platform,
        required: bool,
        prefix: &str,
        secrets: &Secrets,
    ) -> Result<CredentialSet> {
        match secrets.resolve(prefix).await {
            Ok(credentials) => {
                if credentials.is_empty() && required {
                    warn!(
                        platform = %platform,
                        prefix,
                        "no credentials found, checks for this platform will be skipped"
                    );
                }
                Ok(credentials)
            }
            Err(e) if !required => {
                warn!(
                    platform = %platform,
                    error = %e,
                    "secret store unavailable, continuing without credentials"
                );
                Ok(CredentialSet::new())
            }
            Err(e) => Err(Error::config(format!(
                "{platform} requires credentials but the secret store is unavailable: {e}"
            ))),
        }
    }

    async fn apply_destination_secrets(config: &mut AppConfig, secrets: &Secrets) {
        let notifications = &mut config.notifications;

        if notifications.discord.enabled {
            match secrets.resolve(&notifications.discord.secret_prefix).await {
                Ok(found) => notifications.discord.apply_secrets(&found),
                Err(e) => warn!(destination = "discord", error = %e, "could not resolve secrets"),
            }
        }
        if notifications.mastodon.enabled {
            match secrets.resolve(&notifications.mastodon.secret_prefix).await {
                Ok(found) => notifications.mastodon.apply_secrets(&found),
                Err(e) => warn!(destination = "mastodon", error = %e, "could not resolve secrets"),
            }
        }
        if notifications.bluesky.enabled {
            match secrets.resolve(&notifications.bluesky.secret_prefix).await {
                Ok(found) => notifications.bluesky.apply_secrets(&found),
                Err(e) => warn!(destination = "bluesky", error = %e, "could not resolve secrets"),
            }
        }
    }

    fn build_notifications(config: &AppConfig, client: &Client) -> Result<NotificationService> {
        let n = &config.notifications;
        let templates = Arc::new(MessageTemplates::new(n.templates.clone()));
        let retry = RetryPolicy::new(n.max_attempts);
        let mut dispatchers: Vec<Arc<dyn NotificationDispatcher>> = Vec::new();

        if n.discord.enabled {
            dispatchers.push(Arc::new(DiscordDispatcher::new(
                client.clone(),
                n.discord.clone(),
                templates.clone(),
                retry,
            )));
        }
        if n.mastodon.enabled {
            let mastodon =
                MastodonDispatcher::new(client.clone(), &n.mastodon, templates.clone(), retry)
                    .ok_or_else(|| {
                        Error::config("notifications.mastodon requires instance_url and access_token")
                    })?;
            dispatchers.push(Arc::new(mastodon));
        }
        if n.bluesky.enabled {
            let bluesky =
                BlueskyDispatcher::new(client.clone(), &n.bluesky, templates.clone(), retry)
                    .ok_or_else(|| {
                        Error::config("notifications.bluesky requires handle and app_password")
                    })?;
            dispatchers.push(Arc::new(bluesky));
        }

        Ok(NotificationService::new(dispatchers))
    }

    /// Poll until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        info!(channels = self.poller.channel_count(), "stream daemon running");
        self.poller.run().await;
    }

    /// Poll every channel once.
    pub async fn run_once(&self) -> usize {
        let events = self.poller.run_once().await;
        info!(
            channels = self.poller.channel_count(),
            notifications = events.len(),
            "single poll cycle finished"
        );
        events.len()
    }

    pub fn states(&self) -> &Arc<LiveStateStore> {
        self.poller.states()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Stop polling. In-flight dispatches get the configured grace period.
    pub fn shutdown(&self) {
        info!("Shutting down services");
        self.cancellation_token.cancel();
    }
}
