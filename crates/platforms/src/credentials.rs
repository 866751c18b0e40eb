//! Resolved platform credentials.

use std::collections::BTreeMap;
use std::fmt;

/// Credential keys mapped to secret values, scoped to one platform.
///
/// Keys are lower-cased on insertion so lookups are independent of the casing used
/// by the secret source. The set is immutable once built and shared read-only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    values: BTreeMap<String, String>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Look up a credential by key (case-insensitive). Blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Cheap fingerprint of the key/value pairs, used to notice when a
    /// different credential set is handed to a checker.
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        self.values.hash(&mut hasher);
        hasher.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for CredentialSet
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }
}

// Never print secret values.
impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}
