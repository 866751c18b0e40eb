//! Secret stores and prefix-based credential resolution.
//!
//! A [`SecretStore`] returns every secret it holds as a flat name → value map.
//! [`SecretResolver`] fetches that map once and carves per-platform
//! [`CredentialSet`](stream_platforms::CredentialSet)s out of it by name prefix.

mod doppler;
mod env;
mod resolver;

pub use doppler::DopplerStore;
pub use env::EnvStore;
pub use resolver::SecretResolver;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{SecretBackend, SecretsConfig};

/// Every secret held by a store, keyed by its original name.
pub type SecretMap = BTreeMap<String, String>;

/// Errors raised while talking to a secret store.
///
/// All variants mean the store is unavailable to this process; whether that is
/// fatal depends on the platform asking (see
/// [`ServiceContainer`](crate::services::ServiceContainer)).
#[derive(Debug, Error)]
pub enum SecretError {
    /// The environment variable holding the store token is not set.
    #[error("secret store token not found in ${0}")]
    MissingToken(String),

    /// The store rejected the token.
    #[error("{store} rejected the token (status {status})")]
    Rejected { store: &'static str, status: u16 },

    /// The store answered with an unexpected status.
    #[error("{store} unavailable: {reason}")]
    Unavailable { store: &'static str, reason: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid secret payload: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A key-value secret backend.
#[async_trait]
pub trait SecretStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch every secret visible to this process.
    async fn fetch_all(&self) -> Result<SecretMap, SecretError>;
}

/// Build the store selected by `config`.
pub fn build_store(
    config: &SecretsConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn SecretStore>, SecretError> {
    match config.backend {
        SecretBackend::Env => Ok(Arc::new(EnvStore::new())),
        SecretBackend::Doppler => {
            let token = std::env::var(&config.token_env)
                .ok()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| SecretError::MissingToken(config.token_env.clone()))?;

            let mut store = DopplerStore::new(client, token)
                .with_project(config.project.clone(), config.config.clone());
            if let Some(url) = &config.api_url {
                store = store.with_base_url(url);
            }
            Ok(Arc::new(store))
        }
    }
}
