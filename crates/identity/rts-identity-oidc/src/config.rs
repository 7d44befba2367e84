//! External provider configuration snapshot.

use serde::{Deserialize, Serialize};

/// Registry entry for one external identity provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OidcProviderConfig {
    pub enabled: bool,
    /// Client identifiers accepted as the id token audience.
    pub client_ids: Vec<String>,
    /// Issuer URL for self-hosted providers; unused by the hosted families.
    pub url: Option<String>,
    /// Disables the anti-replay nonce gate for providers that cannot echo one.
    pub skip_nonce_check: bool,
}

impl OidcProviderConfig {
    pub fn enabled_with(client_ids: Vec<String>) -> Self {
        Self {
            enabled: true,
            client_ids,
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_skip_nonce_check(mut self, skip: bool) -> Self {
        self.skip_nonce_check = skip;
        self
    }
}

/// Read-only snapshot of every configured external provider.
///
/// Owned by process-wide configuration and passed explicitly into the
/// resolver so tests can exercise one registry variant per case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalProviders {
    pub apple: OidcProviderConfig,
    pub google: OidcProviderConfig,
    pub azure: OidcProviderConfig,
    pub facebook: OidcProviderConfig,
    pub keycloak: OidcProviderConfig,
    /// Extra audience accepted for Apple sign-in from the native iOS app.
    pub ios_bundle_id: Option<String>,
    /// Legacy allow-list of arbitrary issuers, deprecated for security reasons.
    pub allowed_issuers: Vec<String>,
}

impl ExternalProviders {
    pub fn with_ios_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.ios_bundle_id = Some(bundle_id.into());
        self
    }

    pub fn with_allowed_issuers(mut self, issuers: Vec<String>) -> Self {
        self.allowed_issuers = issuers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_builder() {
        let config = OidcProviderConfig::enabled_with(vec!["client-1".to_string()])
            .with_url("https://keycloak.internal/realms/app")
            .with_skip_nonce_check(true);

        assert!(config.enabled);
        assert_eq!(config.client_ids, vec!["client-1"]);
        assert_eq!(
            config.url.as_deref(),
            Some("https://keycloak.internal/realms/app")
        );
        assert!(config.skip_nonce_check);
    }

    #[test]
    fn test_registry_defaults_disabled() {
        let providers = ExternalProviders::default();
        assert!(!providers.google.enabled);
        assert!(providers.allowed_issuers.is_empty());
        assert!(providers.ios_bundle_id.is_none());
    }
}
