//! OIDC discovery and signing key retrieval.

use crate::error::{DiscoveryError, OidcResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::jwk::JwkSet;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

/// Provider metadata plus signing keys for one issuer.
#[derive(Debug, Clone)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks: JwkSet,
    pub fetched_at: DateTime<Utc>,
}

/// The subset of the published OIDC configuration the verifier needs.
#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    jwks_uri: String,
}

/// Capability for resolving an issuer URL to its signing keys.
///
/// Injectable so tests can substitute a fixed key set without network access.
#[async_trait]
pub trait KeyDiscovery: Send + Sync {
    /// Discovery document for the issuer; implementations may serve a cached
    /// (possibly stale) document.
    async fn discover(&self, issuer: &str) -> OidcResult<Arc<DiscoveryDocument>>;

    /// Discovery document fetched fresh, bypassing any cache. Used after a
    /// verification failure that may be explained by key rotation.
    async fn refresh(&self, issuer: &str) -> OidcResult<Arc<DiscoveryDocument>> {
        self.discover(issuer).await
    }
}

/// Discovery over HTTP against the issuer's well-known configuration URL.
#[derive(Clone)]
pub struct HttpKeyDiscovery {
    http_client: reqwest::Client,
}

impl HttpKeyDiscovery {
    pub fn new(http_timeout_seconds: u64) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(http_timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client }
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl KeyDiscovery for HttpKeyDiscovery {
    async fn discover(&self, issuer: &str) -> OidcResult<Arc<DiscoveryDocument>> {
        let issuer_url = Url::parse(issuer).map_err(|error| {
            DiscoveryError::InvalidDocument(format!("Issuer {issuer:?} is not a valid URL: {error}"))
        })?;
        let config_url = format!(
            "{}/.well-known/openid-configuration",
            issuer_url.as_str().trim_end_matches('/')
        );

        let metadata: ProviderMetadata = self
            .http_client
            .get(&config_url)
            .send()
            .await
            .map_err(DiscoveryError::from)?
            .error_for_status()
            .map_err(DiscoveryError::from)?
            .json()
            .await
            .map_err(DiscoveryError::from)?;

        // The advertised issuer must match the one we resolved; anything else
        // means the metadata belongs to a different trust domain.
        if metadata.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
            return Err(DiscoveryError::IssuerMismatch {
                issuer: issuer.to_string(),
                reported: metadata.issuer,
            }
            .into());
        }

        let jwks: JwkSet = self
            .http_client
            .get(&metadata.jwks_uri)
            .send()
            .await
            .map_err(DiscoveryError::from)?
            .error_for_status()
            .map_err(DiscoveryError::from)?
            .json()
            .await
            .map_err(DiscoveryError::from)?;

        if jwks.keys.is_empty() {
            return Err(
                DiscoveryError::InvalidDocument(format!("JWKS for {issuer:?} is empty")).into(),
            );
        }

        debug!(issuer, keys = jwks.keys.len(), "Fetched discovery document");

        Ok(Arc::new(DiscoveryDocument {
            issuer: issuer.to_string(),
            jwks,
            fetched_at: Utc::now(),
        }))
    }
}

/// Caching layer over another [`KeyDiscovery`], keyed by issuer URL.
///
/// Concurrent readers share cached documents; `refresh` replaces the entry
/// unconditionally so a verifier can recover from key rotation.
pub struct CachingKeyDiscovery {
    inner: Arc<dyn KeyDiscovery>,
    ttl: Duration,
    cache: RwLock<HashMap<String, Arc<DiscoveryDocument>>>,
}

impl CachingKeyDiscovery {
    pub fn new(inner: Arc<dyn KeyDiscovery>, ttl_seconds: u64) -> Self {
        Self {
            inner,
            ttl: Duration::seconds(ttl_seconds as i64),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl KeyDiscovery for CachingKeyDiscovery {
    async fn discover(&self, issuer: &str) -> OidcResult<Arc<DiscoveryDocument>> {
        {
            let cache = self.cache.read().await;
            if let Some(document) = cache.get(issuer) {
                if Utc::now() - document.fetched_at < self.ttl {
                    return Ok(document.clone());
                }
            }
        }

        self.refresh(issuer).await
    }

    async fn refresh(&self, issuer: &str) -> OidcResult<Arc<DiscoveryDocument>> {
        let document = self.inner.discover(issuer).await?;

        let mut cache = self.cache.write().await;
        cache.insert(issuer.to_string(), document.clone());

        Ok(document)
    }
}

/// Fixed key set served for every issuer; test double for [`KeyDiscovery`].
pub struct StaticKeyDiscovery {
    jwks: JwkSet,
}

impl StaticKeyDiscovery {
    pub fn new(jwks: JwkSet) -> Self {
        Self { jwks }
    }
}

#[async_trait]
impl KeyDiscovery for StaticKeyDiscovery {
    async fn discover(&self, issuer: &str) -> OidcResult<Arc<DiscoveryDocument>> {
        Ok(Arc::new(DiscoveryDocument {
            issuer: issuer.to_string(),
            jwks: self.jwks.clone(),
            fetched_at: Utc::now(),
        }))
    }
}
