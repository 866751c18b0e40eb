//! Doppler secrets manager backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{SecretError, SecretMap, SecretStore};

const STORE_NAME: &str = "doppler";

pub struct DopplerStore {
    client: Client,
    base_url: String,
    token: String,
    project: Option<String>,
    config: Option<String>,
}

impl DopplerStore {
    pub const BASE_URL: &'static str = "https://api.doppler.com";

    pub fn new(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: Self::BASE_URL.to_string(),
            token: token.into(),
            project: None,
            config: None,
        }
    }

    /// Scope the download to a project/config pair. Service tokens are already
    /// scoped and need neither.
    pub fn with_project(mut self, project: Option<String>, config: Option<String>) -> Self {
        self.project = project;
        self.config = config;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

impl std::fmt::Debug for DopplerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DopplerStore")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretStore for DopplerStore {
    fn name(&self) -> &'static str {
        STORE_NAME
    }

    async fn fetch_all(&self) -> Result<SecretMap, SecretError> {
        let mut query = vec![("format", "json")];
        if let Some(project) = &self.project {
            query.push(("project", project.as_str()));
        }
        if let Some(config) = &self.config {
            query.push(("config", config.as_str()));
        }

        let response = self
            .client
            .get(format!(
                "{}/v3/configs/config/secrets/download",
                self.base_url
            ))
            .query(&query)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(SecretError::Rejected {
                store: STORE_NAME,
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SecretError::Unavailable {
                store: STORE_NAME,
                reason: format!("{status}: {body}"),
            });
        }

        let raw: BTreeMap<String, serde_json::Value> = response.json().await?;
        let secrets: SecretMap = raw
            .into_iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => return None,
                    other => other.to_string(),
                };
                Some((name, value))
            })
            .collect();

        debug!(count = secrets.len(), "downloaded secrets from doppler");
        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn store(server: &mockito::ServerGuard) -> DopplerStore {
        let client = stream_platforms::client::create_client(None).unwrap();
        DopplerStore::new(client, "dp.st.token").with_base_url(&server.url())
    }

    #[tokio::test]
    async fn test_download() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v3/configs/config/secrets/download")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("format".into(), "json".into()),
                Matcher::UrlEncoded("project".into(), "stream-daemon".into()),
                Matcher::UrlEncoded("config".into(), "prd".into()),
            ]))
            .match_header("authorization", "Bearer dp.st.token")
            .with_status(200)
            .with_body(r#"{"TWITCH_CLIENT_ID":"abc","RETRIES":3,"UNSET":null}"#)
            .create_async()
            .await;

        let secrets = store(&server)
            .with_project(Some("stream-daemon".into()), Some("prd".into()))
            .fetch_all()
            .await
            .unwrap();

        assert_eq!(secrets.get("TWITCH_CLIENT_ID").map(String::as_str), Some("abc"));
        assert_eq!(secrets.get("RETRIES").map(String::as_str), Some("3"));
        assert!(!secrets.contains_key("UNSET"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v3/configs/config/secrets/download")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"messages":["Invalid Auth token"],"success":false}"#)
            .create_async()
            .await;

        let err = store(&server).fetch_all().await.unwrap_err();
        assert!(matches!(err, SecretError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v3/configs/config/secrets/download")
            .match_query(Matcher::Any)
            .with_status(502)
            .create_async()
            .await;

        let err = store(&server).fetch_all().await.unwrap_err();
        assert!(matches!(err, SecretError::Unavailable { .. }));
    }

    #[test]
    fn test_debug_hides_token() {
        let client = stream_platforms::client::create_client(None).unwrap();
        let store = DopplerStore::new(client, "dp.st.secret-token");
        assert!(!format!("{store:?}").contains("secret-token"));
    }
}
