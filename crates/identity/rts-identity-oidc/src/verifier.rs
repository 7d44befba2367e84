//! Identity token verification.
//!
//! Every gate here is a security control: signature and issuer via the
//! discovered JWKS, subject presence, audience, the anti-replay nonce, and
//! the access-token hash cross-check.

use crate::discovery::{DiscoveryDocument, KeyDiscovery};
use crate::error::{OidcError, OidcResult};
use crate::resolver::ResolvedProvider;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use rts_identity_core::VerifiedIdentity;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const ACCEPTED_ALGORITHMS: [Algorithm; 2] = [Algorithm::RS256, Algorithm::ES256];

/// Clock skew tolerated when validating `exp`.
const EXPIRY_LEEWAY_SECONDS: u64 = 60;

/// The `aud` claim, which providers serialize as a string or an array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(audience) => vec![audience],
            Audience::Many(audiences) => audiences,
        }
    }
}

/// Claims carried by an identity token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub at_hash: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(flatten)]
    pub additional_claims: HashMap<String, serde_json::Value>,
}

/// Verifies inbound identity tokens against a resolved provider.
#[derive(Clone)]
pub struct IdTokenVerifier {
    discovery: Arc<dyn KeyDiscovery>,
}

impl IdTokenVerifier {
    pub fn new(discovery: Arc<dyn KeyDiscovery>) -> Self {
        Self { discovery }
    }

    /// Runs every verification gate and returns the verified identity.
    ///
    /// `access_token` and `nonce` are the caller-supplied grant parameters;
    /// both are optional at the wire level and gated here.
    pub async fn verify(
        &self,
        provider: &ResolvedProvider,
        id_token: &str,
        access_token: Option<&str>,
        nonce: Option<&str>,
    ) -> OidcResult<VerifiedIdentity> {
        let document = self.discovery.discover(&provider.issuer).await?;

        let claims = match self.decode_and_validate(provider, id_token, &document) {
            Ok(claims) => claims,
            // A signature failure or unknown kid may just mean the provider
            // rotated keys since the cached fetch; retry once against a
            // fresh document.
            Err(error) if retryable_with_fresh_keys(&error) => {
                let document = self.discovery.refresh(&provider.issuer).await?;
                self.decode_and_validate(provider, id_token, &document)?
            }
            Err(error) => return Err(error),
        };

        let subject = claims
            .sub
            .clone()
            .filter(|subject| !subject.is_empty())
            .ok_or(OidcError::MissingSubject)?;

        let audience = claims
            .aud
            .clone()
            .map(Audience::into_vec)
            .unwrap_or_default();
        check_audience(&audience, &provider.acceptable_client_ids)?;

        if !provider.skip_nonce_check {
            check_nonce(nonce, claims.nonce.as_deref())?;
        }

        check_access_token_hash(provider, access_token, claims.at_hash.as_deref())?;

        Ok(build_identity(provider, subject, audience, claims))
    }

    fn decode_and_validate(
        &self,
        provider: &ResolvedProvider,
        id_token: &str,
        document: &DiscoveryDocument,
    ) -> OidcResult<IdTokenClaims> {
        let header = decode_header(id_token).map_err(OidcError::BadIdToken)?;

        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(OidcError::UnsupportedAlgorithm {
                alg: format!("{:?}", header.alg),
            });
        }

        // Pick the signing key by kid; a token without one is accepted only
        // against a single-key JWKS.
        let jwk = match &header.kid {
            Some(kid) => document
                .jwks
                .find(kid)
                .ok_or_else(|| OidcError::UnknownSigningKey { kid: kid.clone() })?,
            None if document.jwks.keys.len() == 1 => &document.jwks.keys[0],
            None => {
                return Err(OidcError::UnknownSigningKey {
                    kid: String::new(),
                });
            }
        };

        let decoding_key = DecodingKey::from_jwk(jwk).map_err(OidcError::BadIdToken)?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&provider.issuer]);
        validation.validate_aud = false;
        validation.leeway = EXPIRY_LEEWAY_SECONDS;

        let token_data = decode::<IdTokenClaims>(id_token, &decoding_key, &validation)
            .map_err(OidcError::BadIdToken)?;

        Ok(token_data.claims)
    }
}

fn retryable_with_fresh_keys(error: &OidcError) -> bool {
    match error {
        OidcError::UnknownSigningKey { .. } => true,
        OidcError::BadIdToken(source) => {
            matches!(source.kind(), ErrorKind::InvalidSignature)
        }
        _ => false,
    }
}

/// At least one token audience must equal at least one acceptable client id;
/// empty strings are skipped on both sides.
fn check_audience(audience: &[String], acceptable_client_ids: &[String]) -> OidcResult<()> {
    let correct_audience = acceptable_client_ids
        .iter()
        .filter(|client_id| !client_id.is_empty())
        .any(|client_id| {
            audience
                .iter()
                .filter(|aud| !aud.is_empty())
                .any(|aud| aud == client_id)
        });

    if correct_audience {
        Ok(())
    } else {
        Err(OidcError::AudienceMismatch)
    }
}

/// Anti-replay check: the caller-supplied nonce must hash to the token's
/// nonce claim, and neither side may be present without the other.
fn check_nonce(param_nonce: Option<&str>, token_nonce: Option<&str>) -> OidcResult<()> {
    let param_nonce = param_nonce.unwrap_or_default();
    let token_nonce = token_nonce.unwrap_or_default();

    match (param_nonce.is_empty(), token_nonce.is_empty()) {
        (true, true) => Ok(()),
        (false, false) => {
            if sha256_hex(param_nonce) == token_nonce {
                Ok(())
            } else {
                Err(OidcError::NonceMismatch)
            }
        }
        _ => Err(OidcError::NoncePresenceMismatch),
    }
}

/// Lowercase hex digest, the format providers echo the nonce in.
fn sha256_hex(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

fn check_access_token_hash(
    provider: &ResolvedProvider,
    access_token: Option<&str>,
    at_hash: Option<&str>,
) -> OidcResult<()> {
    match (access_token, at_hash) {
        (None, Some(_)) => {
            warn!(
                issuer = provider.issuer,
                "ID token has an at_hash claim, but no access_token parameter was provided. In future versions, access_token will be mandatory as it's security best practice."
            );
            Ok(())
        }
        (Some(_), None) => {
            info!(
                issuer = provider.issuer,
                "ID token does not have an at_hash claim, access_token parameter is unused."
            );
            Ok(())
        }
        (Some(access_token), Some(at_hash)) => {
            let digest = Sha256::digest(access_token.as_bytes());
            let computed = URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2]);
            if computed == at_hash {
                Ok(())
            } else {
                Err(OidcError::AccessTokenHashMismatch)
            }
        }
        (None, None) => Ok(()),
    }
}

fn build_identity(
    provider: &ResolvedProvider,
    subject: String,
    audience: Vec<String>,
    claims: IdTokenClaims,
) -> VerifiedIdentity {
    let mut metadata = serde_json::Map::new();
    if let Some(picture) = &claims.picture {
        metadata.insert("picture".to_string(), picture.clone().into());
    }
    if let Some(email_verified) = claims.email_verified {
        metadata.insert("email_verified".to_string(), email_verified.into());
    }
    for (key, value) in claims.additional_claims {
        metadata.insert(key, value);
    }

    VerifiedIdentity {
        provider_type: provider.provider_type.clone(),
        subject,
        audience,
        nonce: claims.nonce,
        access_token_hash: claims.at_hash,
        email: claims.email,
        display_name: claims.name,
        metadata: if metadata.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(metadata))
        },
    }
}
