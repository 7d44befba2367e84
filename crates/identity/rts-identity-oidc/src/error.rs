//! OIDC error types.

use thiserror::Error;

pub type OidcResult<T> = Result<T, OidcError>;

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("Custom OIDC provider {0:?} not allowed")]
    UnknownProvider(String),

    #[error("Provider (issuer {0:?}) is not enabled")]
    ProviderDisabled(String),

    #[error("Provider {0:?} has no configured URL")]
    ProviderNotConfigured(String),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Bad ID token")]
    BadIdToken(#[source] jsonwebtoken::errors::Error),

    #[error("ID token signing key {kid:?} is not in the provider JWKS")]
    UnknownSigningKey { kid: String },

    #[error("ID token algorithm {alg} is not accepted")]
    UnsupportedAlgorithm { alg: String },

    #[error("Missing sub claim in id_token")]
    MissingSubject,

    #[error("Unacceptable audience in id_token")]
    AudienceMismatch,

    #[error("Passed nonce and nonce in id_token should either both exist or not")]
    NoncePresenceMismatch,

    #[error("Nonces mismatch")]
    NonceMismatch,

    #[error("Access token does not match the at_hash claim in id_token")]
    AccessTokenHashMismatch,
}

impl OidcError {
    /// Whether the failure is an internal one (the issuer was accepted but
    /// could not be reached) rather than a rejection of the request.
    pub fn is_internal(&self) -> bool {
        matches!(self, OidcError::Discovery(_))
    }
}

/// Failures while fetching provider metadata or signing keys.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Discovery document for {issuer:?} reports issuer {reported:?}")]
    IssuerMismatch { issuer: String, reported: String },

    #[error("Invalid discovery document: {0}")]
    InvalidDocument(String),
}
