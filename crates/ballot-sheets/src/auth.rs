//! Access tokens for the Sheets API.

use std::time::Duration;

use async_trait::async_trait;
use ballot::StoreError;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

/// Default token endpoint of the GCE/Cloud Run metadata server.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before the server-side expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// Supplies bearer tokens for Sheets requests.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, StoreError>;

    /// Drop any cached token. Called after the API rejects one.
    async fn invalidate(&self) {}
}

/// A fixed token, e.g. from `gcloud auth print-access-token`.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, StoreError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Service account token from the metadata server, fetched lazily and
/// cached until shortly before it expires.
pub struct MetadataServerToken {
    http: reqwest::Client,
    url: String,
    cache: RwLock<Option<(String, Instant)>>,
}

impl MetadataServerToken {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_url(http, METADATA_TOKEN_URL)
    }

    pub fn with_url(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            cache: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> Result<MetadataTokenResponse, StoreError> {
        info!("Requesting new sheets access token from metadata server");
        let response = self
            .http
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(StoreError::unavailable)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "metadata server refused token request");
            return Err(StoreError::unavailable(format!(
                "metadata server returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::Protocol(format!("bad metadata token response: {e}")))
    }
}

#[async_trait]
impl TokenSource for MetadataServerToken {
    async fn token(&self) -> Result<String, StoreError> {
        {
            let cache = self.cache.read().await;
            if let Some((token, expires_at)) = cache.as_ref() {
                if Instant::now() + EXPIRY_MARGIN < *expires_at {
                    return Ok(token.clone());
                }
            }
        }

        let fresh = self.fetch().await?;
        let expires_at = Instant::now() + Duration::from_secs(fresh.expires_in);
        *self.cache.write().await = Some((fresh.access_token.clone(), expires_at));
        Ok(fresh.access_token)
    }

    async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_token_is_returned_verbatim() {
        let source = StaticToken::new("ya29.token");
        assert_eq!(source.token().await.unwrap(), "ya29.token");
        source.invalidate().await;
        assert_eq!(source.token().await.unwrap(), "ya29.token");
    }

    #[test]
    fn metadata_response_parses() {
        let parsed: MetadataTokenResponse = serde_json::from_str(
            r#"{"access_token":"ya29.abc","expires_in":3599,"token_type":"Bearer"}"#,
        )
        .unwrap();
        assert_eq!(parsed.access_token, "ya29.abc");
        assert_eq!(parsed.expires_in, 3599);
    }

    #[tokio::test]
    async fn cached_token_is_served_until_invalidated() {
        let source = MetadataServerToken::with_url(reqwest::Client::new(), "http://127.0.0.1:9/");
        *source.cache.write().await =
            Some(("cached".into(), Instant::now() + Duration::from_secs(3600)));

        assert_eq!(source.token().await.unwrap(), "cached");

        source.invalidate().await;
        assert!(source.cache.read().await.is_none());
    }
}
