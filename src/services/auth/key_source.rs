//! Where an issuer's published key set comes from.
//!
//! Two sources are supported and picked per issuer at startup:
//! - `OidcDiscoverySource`: reads `<issuer>/.well-known/openid-configuration` once, then fetches
//!   the advertised `jwks_uri` on every refresh.
//! - `StaticJwksSource`: fetches a configured JWKS URI directly.
//!
//! Sources only move bytes. Caching, key selection and coalescing live in `KeyResolver`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

/// A JWKS document as published by an issuer.
///
/// Keys are kept as raw JSON so that one unusable entry does not spoil the whole set;
/// `KeyResolver` converts them one by one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeySetDocument {
    #[serde(default)]
    pub keys: Vec<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum KeySourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("discovery document issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[async_trait]
pub trait KeySource: Send + Sync {
    /// Short description for logs (never contains secrets).
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<KeySetDocument, KeySourceError>;
}

/// HTTP client shared by all key sources.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &Url,
) -> Result<T, KeySourceError> {
    let response = http.get(url.clone()).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(KeySourceError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    Ok(response.json::<T>().await?)
}

/// Fetches keys from a fixed JWKS URI.
#[derive(Debug, Clone)]
pub struct StaticJwksSource {
    jwks_uri: Url,
    http: reqwest::Client,
}

impl StaticJwksSource {
    pub fn new(jwks_uri: Url, http: reqwest::Client) -> Self {
        Self { jwks_uri, http }
    }
}

#[async_trait]
impl KeySource for StaticJwksSource {
    fn describe(&self) -> String {
        format!("jwks {}", self.jwks_uri)
    }

    async fn fetch(&self) -> Result<KeySetDocument, KeySourceError> {
        get_json(&self.http, &self.jwks_uri).await
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

/// Locates the key set through OpenID Connect discovery.
///
/// The discovery document is read once and its `jwks_uri` remembered; a failed discovery is
/// retried on the next fetch.
#[derive(Debug)]
pub struct OidcDiscoverySource {
    issuer: String,
    discovery_url: Url,
    jwks_uri: OnceCell<Url>,
    http: reqwest::Client,
}

impl OidcDiscoverySource {
    pub fn new(issuer: &str, http: reqwest::Client) -> Result<Self, KeySourceError> {
        let discovery_url = Url::parse(&format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        ))?;

        Ok(Self {
            issuer: issuer.to_string(),
            discovery_url,
            jwks_uri: OnceCell::new(),
            http,
        })
    }

    async fn jwks_uri(&self) -> Result<&Url, KeySourceError> {
        self.jwks_uri
            .get_or_try_init(|| async {
                let document: DiscoveryDocument = get_json(&self.http, &self.discovery_url).await?;

                // The document must describe the issuer we were configured with.
                if document.issuer != self.issuer {
                    return Err(KeySourceError::IssuerMismatch {
                        expected: self.issuer.clone(),
                        actual: document.issuer,
                    });
                }

                let jwks_uri = Url::parse(&document.jwks_uri)?;
                debug!(issuer = %self.issuer, jwks_uri = %jwks_uri, "discovered jwks_uri");
                Ok(jwks_uri)
            })
            .await
    }
}

#[async_trait]
impl KeySource for OidcDiscoverySource {
    fn describe(&self) -> String {
        format!("oidc discovery {}", self.discovery_url)
    }

    async fn fetch(&self) -> Result<KeySetDocument, KeySourceError> {
        let jwks_uri = self.jwks_uri().await?;
        get_json(&self.http, jwks_uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_is_built_from_issuer() {
        let http = reqwest::Client::new();

        let source = OidcDiscoverySource::new("https://login.example.com/tenant/v2.0", http.clone())
            .unwrap();
        assert_eq!(
            source.discovery_url.as_str(),
            "https://login.example.com/tenant/v2.0/.well-known/openid-configuration"
        );

        // A trailing slash on the issuer does not produce a double slash.
        let source = OidcDiscoverySource::new("https://sts.example.org/", http).unwrap();
        assert_eq!(
            source.discovery_url.as_str(),
            "https://sts.example.org/.well-known/openid-configuration"
        );
        assert_eq!(source.issuer, "https://sts.example.org/");
    }

    #[test]
    fn key_set_document_tolerates_missing_keys() {
        let document: KeySetDocument = serde_json::from_str("{}").unwrap();
        assert!(document.keys.is_empty());
    }
}
