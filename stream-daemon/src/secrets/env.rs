use async_trait::async_trait;

use super::{SecretError, SecretMap, SecretStore};

/// Reads secrets from the process environment (after `.env` was loaded).
#[derive(Debug, Default)]
pub struct EnvStore {
    fixed: Option<SecretMap>,
}

impl EnvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store serving a fixed set of variables instead of the real environment.
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fixed: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SecretStore for EnvStore {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn fetch_all(&self) -> Result<SecretMap, SecretError> {
        Ok(match &self.fixed {
            Some(vars) => vars.clone(),
            None => std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        })
    }
}
