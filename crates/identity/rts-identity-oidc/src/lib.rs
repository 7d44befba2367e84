//! OIDC provider resolution and identity token verification.
//!
//! This crate is the trust boundary of the token exchange: it maps a grant
//! request to a configured provider, discovers that provider's signing keys,
//! and runs every verification gate over the inbound identity token.

mod config;
mod discovery;
mod error;
mod resolver;
mod verifier;

#[cfg(test)]
mod testkeys;

pub use config::{ExternalProviders, OidcProviderConfig};
pub use discovery::{
    CachingKeyDiscovery, DiscoveryDocument, HttpKeyDiscovery, KeyDiscovery, StaticKeyDiscovery,
};
pub use error::{DiscoveryError, OidcError, OidcResult};
pub use resolver::{
    ISSUER_APPLE, ISSUER_AZURE_COMMON, ISSUER_AZURE_ORGANIZATIONS, ISSUER_FACEBOOK, ISSUER_GOOGLE,
    ProviderFamily, ProviderHint, ResolvedProvider, resolve_provider,
};
pub use verifier::{Audience, IdTokenClaims, IdTokenVerifier};

// Re-export common types for convenience
pub use rts_identity_core::VerifiedIdentity;
