//! Provider resolution for inbound identity token grants.
//!
//! Maps a grant request to exactly one registry entry, or to a legacy
//! allow-listed issuer, with explicit first-match-wins precedence over the
//! well-known provider families.

use crate::config::{ExternalProviders, OidcProviderConfig};
use crate::error::{OidcError, OidcResult};
use tracing::warn;

pub const ISSUER_APPLE: &str = "https://appleid.apple.com";
pub const ISSUER_GOOGLE: &str = "https://accounts.google.com";
pub const ISSUER_AZURE_COMMON: &str = "https://login.microsoftonline.com/common/v2.0";
pub const ISSUER_AZURE_ORGANIZATIONS: &str =
    "https://login.microsoftonline.com/organizations/v2.0";
pub const ISSUER_FACEBOOK: &str = "https://www.facebook.com";

/// Provider selectors from the grant request. Either `provider` or both
/// `client_id` and `issuer` are expected; the caller validates presence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderHint<'a> {
    pub provider: Option<&'a str>,
    pub client_id: Option<&'a str>,
    pub issuer: Option<&'a str>,
}

/// The provider a request resolved to, flattened to what the verifier needs.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub provider_type: String,
    pub issuer: String,
    pub acceptable_client_ids: Vec<String>,
    pub skip_nonce_check: bool,
}

/// Well-known provider families, in match-precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    Apple,
    Google,
    Azure,
    Facebook,
    Keycloak,
}

impl ProviderFamily {
    pub const ALL: [ProviderFamily; 5] = [
        ProviderFamily::Apple,
        ProviderFamily::Google,
        ProviderFamily::Azure,
        ProviderFamily::Facebook,
        ProviderFamily::Keycloak,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProviderFamily::Apple => "apple",
            ProviderFamily::Google => "google",
            ProviderFamily::Azure => "azure",
            ProviderFamily::Facebook => "facebook",
            ProviderFamily::Keycloak => "keycloak",
        }
    }

    fn config<'a>(&self, providers: &'a ExternalProviders) -> &'a OidcProviderConfig {
        match self {
            ProviderFamily::Apple => &providers.apple,
            ProviderFamily::Google => &providers.google,
            ProviderFamily::Azure => &providers.azure,
            ProviderFamily::Facebook => &providers.facebook,
            ProviderFamily::Keycloak => &providers.keycloak,
        }
    }

    fn matches(&self, providers: &ExternalProviders, hint: &ProviderHint<'_>) -> bool {
        if hint.provider == Some(self.name()) {
            return true;
        }

        let issuer = match hint.issuer {
            Some(issuer) => issuer,
            None => return false,
        };

        match self {
            ProviderFamily::Apple => issuer == ISSUER_APPLE,
            ProviderFamily::Google => issuer == ISSUER_GOOGLE,
            ProviderFamily::Azure => {
                issuer == ISSUER_AZURE_COMMON || issuer == ISSUER_AZURE_ORGANIZATIONS
            }
            ProviderFamily::Facebook => issuer == ISSUER_FACEBOOK,
            ProviderFamily::Keycloak => {
                let config = self.config(providers);
                config.enabled && config.url.as_deref().is_some_and(|url| url == issuer)
            }
        }
    }

    fn issuer(&self, providers: &ExternalProviders, hint: &ProviderHint<'_>) -> OidcResult<String> {
        match self {
            ProviderFamily::Apple => Ok(ISSUER_APPLE.to_string()),
            ProviderFamily::Google => Ok(ISSUER_GOOGLE.to_string()),
            ProviderFamily::Facebook => Ok(ISSUER_FACEBOOK.to_string()),
            // Azure tenants carry their tenant in the issuer URL, so the
            // caller-supplied variant is kept as-is.
            ProviderFamily::Azure => Ok(hint
                .issuer
                .filter(|issuer| !issuer.is_empty())
                .unwrap_or(ISSUER_AZURE_COMMON)
                .to_string()),
            ProviderFamily::Keycloak => self
                .config(providers)
                .url
                .clone()
                .filter(|url| !url.is_empty())
                .ok_or_else(|| OidcError::ProviderNotConfigured(self.name().to_string())),
        }
    }

    fn acceptable_client_ids(&self, providers: &ExternalProviders) -> Vec<String> {
        let mut client_ids = self.config(providers).client_ids.clone();
        if *self == ProviderFamily::Apple {
            if let Some(bundle_id) = &providers.ios_bundle_id {
                if !bundle_id.is_empty() {
                    client_ids.push(bundle_id.clone());
                }
            }
        }
        client_ids
    }
}

/// Resolves a grant request against the provider registry.
///
/// Well-known families are tried in order, first match wins; requests that
/// match none fall back to the legacy allow-list of arbitrary issuers.
pub fn resolve_provider(
    providers: &ExternalProviders,
    hint: &ProviderHint<'_>,
) -> OidcResult<ResolvedProvider> {
    for family in ProviderFamily::ALL {
        if !family.matches(providers, hint) {
            continue;
        }

        let issuer = family.issuer(providers, hint)?;
        if !family.config(providers).enabled {
            return Err(OidcError::ProviderDisabled(issuer));
        }

        return Ok(ResolvedProvider {
            provider_type: family.name().to_string(),
            issuer,
            acceptable_client_ids: family.acceptable_client_ids(providers),
            skip_nonce_check: family.config(providers).skip_nonce_check,
        });
    }

    let issuer = hint.issuer.unwrap_or_default();
    let client_id = hint.client_id.unwrap_or_default();

    warn!(
        issuer,
        client_id,
        "Use of the token grant with arbitrary issuer and client_id is deprecated for security reasons. Please switch to using the API with provider only!"
    );

    if providers
        .allowed_issuers
        .iter()
        .any(|allowed| allowed == issuer)
    {
        return Ok(ResolvedProvider {
            provider_type: issuer.to_string(),
            issuer: issuer.to_string(),
            acceptable_client_ids: vec![client_id.to_string()],
            skip_nonce_check: false,
        });
    }

    Err(OidcError::UnknownProvider(issuer.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ExternalProviders {
        ExternalProviders {
            apple: OidcProviderConfig::enabled_with(vec!["apple-client".to_string()]),
            google: OidcProviderConfig::enabled_with(vec!["google-client".to_string()]),
            azure: OidcProviderConfig::enabled_with(vec!["azure-client".to_string()]),
            facebook: OidcProviderConfig::enabled_with(vec!["facebook-client".to_string()]),
            keycloak: OidcProviderConfig::enabled_with(vec!["keycloak-client".to_string()])
                .with_url("https://keycloak.internal/realms/app"),
            ios_bundle_id: None,
            allowed_issuers: vec!["https://issuer.example.com".to_string()],
        }
    }

    #[test]
    fn test_resolve_by_provider_name() {
        let resolved = resolve_provider(
            &registry(),
            &ProviderHint {
                provider: Some("google"),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(resolved.provider_type, "google");
        assert_eq!(resolved.issuer, ISSUER_GOOGLE);
        assert_eq!(resolved.acceptable_client_ids, vec!["google-client"]);
    }

    #[test]
    fn test_resolve_by_issuer() {
        let resolved = resolve_provider(
            &registry(),
            &ProviderHint {
                client_id: Some("apple-client"),
                issuer: Some(ISSUER_APPLE),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(resolved.provider_type, "apple");
        assert_eq!(resolved.issuer, ISSUER_APPLE);
    }

    #[test]
    fn test_provider_name_takes_precedence_over_allow_list() {
        // A request naming a family resolves to the family even when the
        // issuer would have matched the legacy allow-list.
        let resolved = resolve_provider(
            &registry(),
            &ProviderHint {
                provider: Some("google"),
                client_id: Some("other-client"),
                issuer: Some("https://issuer.example.com"),
            },
        )
        .unwrap();

        assert_eq!(resolved.provider_type, "google");
        assert_eq!(resolved.acceptable_client_ids, vec!["google-client"]);
    }

    #[test]
    fn test_azure_issuer_variants_map_to_one_config() {
        for issuer in [ISSUER_AZURE_COMMON, ISSUER_AZURE_ORGANIZATIONS] {
            let resolved = resolve_provider(
                &registry(),
                &ProviderHint {
                    client_id: Some("azure-client"),
                    issuer: Some(issuer),
                    ..Default::default()
                },
            )
            .unwrap();

            assert_eq!(resolved.provider_type, "azure");
            assert_eq!(resolved.issuer, issuer);
            assert_eq!(resolved.acceptable_client_ids, vec!["azure-client"]);
        }
    }

    #[test]
    fn test_azure_by_name_defaults_to_common_issuer() {
        let resolved = resolve_provider(
            &registry(),
            &ProviderHint {
                provider: Some("azure"),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(resolved.issuer, ISSUER_AZURE_COMMON);
    }

    #[test]
    fn test_apple_accepts_ios_bundle_id_audience() {
        let providers = registry().with_ios_bundle_id("com.example.app");

        let resolved = resolve_provider(
            &providers,
            &ProviderHint {
                provider: Some("apple"),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(
            resolved.acceptable_client_ids,
            vec!["apple-client", "com.example.app"]
        );
    }

    #[test]
    fn test_disabled_provider_is_rejected() {
        let mut providers = registry();
        providers.google.enabled = false;

        let result = resolve_provider(
            &providers,
            &ProviderHint {
                provider: Some("google"),
                ..Default::default()
            },
        );

        assert!(matches!(result, Err(OidcError::ProviderDisabled(issuer)) if issuer == ISSUER_GOOGLE));
    }

    #[test]
    fn test_keycloak_issuer_match_requires_enabled_and_url() {
        let hint = ProviderHint {
            client_id: Some("keycloak-client"),
            issuer: Some("https://keycloak.internal/realms/app"),
            ..Default::default()
        };

        let resolved = resolve_provider(&registry(), &hint).unwrap();
        assert_eq!(resolved.provider_type, "keycloak");
        assert_eq!(resolved.issuer, "https://keycloak.internal/realms/app");

        // Disabled entry: the issuer-match arm no longer applies and the
        // request falls through to the allow-list, which rejects it.
        let mut disabled = registry();
        disabled.keycloak.enabled = false;
        let result = resolve_provider(&disabled, &hint);
        assert!(matches!(result, Err(OidcError::UnknownProvider(_))));
    }

    #[test]
    fn test_keycloak_by_name_without_url_fails_fast() {
        let mut providers = registry();
        providers.keycloak.url = None;

        let result = resolve_provider(
            &providers,
            &ProviderHint {
                provider: Some("keycloak"),
                ..Default::default()
            },
        );

        assert!(matches!(result, Err(OidcError::ProviderNotConfigured(_))));
    }

    #[test]
    fn test_allow_listed_issuer_restricts_audience_to_caller_client_id() {
        let resolved = resolve_provider(
            &registry(),
            &ProviderHint {
                client_id: Some("caller-client"),
                issuer: Some("https://issuer.example.com"),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(resolved.provider_type, "https://issuer.example.com");
        assert_eq!(resolved.acceptable_client_ids, vec!["caller-client"]);
        assert!(!resolved.skip_nonce_check);
    }

    #[test]
    fn test_unknown_issuer_is_rejected_by_name() {
        let result = resolve_provider(
            &registry(),
            &ProviderHint {
                client_id: Some("caller-client"),
                issuer: Some("https://rogue.example.com"),
                ..Default::default()
            },
        );

        assert!(
            matches!(result, Err(OidcError::UnknownProvider(issuer)) if issuer == "https://rogue.example.com")
        );
    }

    #[test]
    fn test_empty_client_id_list_still_resolves() {
        let mut providers = registry();
        providers.google.client_ids.clear();

        let resolved = resolve_provider(
            &providers,
            &ProviderHint {
                provider: Some("google"),
                ..Default::default()
            },
        )
        .unwrap();

        // Enablement and client id configuration are independent; the
        // audience gate downstream simply never succeeds.
        assert!(resolved.acceptable_client_ids.is_empty());
    }
}
