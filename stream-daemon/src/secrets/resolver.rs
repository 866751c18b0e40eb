use std::sync::Arc;

use stream_platforms::CredentialSet;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::{SecretError, SecretMap, SecretStore};

/// Resolves credential sets by secret name prefix.
///
/// The store is fetched once and the snapshot reused for every prefix, so all
/// platforms see one consistent view. A failed fetch is not cached; the next
/// call retries.
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
    snapshot: OnceCell<Arc<SecretMap>>,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            snapshot: OnceCell::new(),
        }
    }

    async fn snapshot(&self) -> Result<Arc<SecretMap>, SecretError> {
        self.snapshot
            .get_or_try_init(|| async {
                let secrets = self.store.fetch_all().await?;
                info!(
                    store = self.store.name(),
                    count = secrets.len(),
                    "loaded secrets"
                );
                Ok(Arc::new(secrets))
            })
            .await
            .cloned()
    }

    /// Credentials stored under `prefix`.
    ///
    /// `TWITCH_CLIENT_ID` resolves to `client_id` for prefix `twitch`. No match
    /// yields an empty set.
    #[instrument(skip(self))]
    pub async fn resolve(&self, prefix: &str) -> Result<CredentialSet, SecretError> {
        let snapshot = self.snapshot().await?;
        let credentials = select_prefixed(&snapshot, prefix);
        debug!(keys = ?credentials.keys().collect::<Vec<_>>(), "resolved credentials");
        Ok(credentials)
    }
}

/// Pick the secrets named `<prefix>_<key>`, matching the prefix case-insensitively.
pub fn select_prefixed(secrets: &SecretMap, prefix: &str) -> CredentialSet {
    let wanted = format!("{}_", prefix.trim().trim_end_matches('_')).to_ascii_lowercase();

    secrets
        .iter()
        .filter_map(|(name, value)| {
            let lowered = name.to_ascii_lowercase();
            let key = lowered.strip_prefix(&wanted)?;
            (!key.is_empty()).then(|| (key.to_string(), value.clone()))
        })
        .collect()
}
