use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str = concat!("stream-daemon/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout applied by [`create_client`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Install the process-wide rustls crypto provider. Safe to call repeatedly.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Client builder preconfigured with the daemon's user agent and timeouts.
pub fn create_client_builder(timeout: Option<Duration>) -> reqwest::ClientBuilder {
    install_rustls_provider();
    Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
        .pool_idle_timeout(Duration::from_secs(90))
}

pub fn create_client(timeout: Option<Duration>) -> Result<Client, reqwest::Error> {
    create_client_builder(timeout).build()
}
