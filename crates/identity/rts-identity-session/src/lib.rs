//! Session issuance: a persisted refresh token paired with a JWT access token.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rand::{Rng, thread_rng};
use rts_identity_core::GrantMethod;
use rts_identity_store::{RefreshTokenRecord, StoreError, User, UserTransaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("Storage error: {0}")]
    StoreError(#[from] StoreError),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub algorithm: Algorithm,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
            jwt_ttl: Duration::hours(1),
            algorithm: Algorithm::HS256,
        }
    }
}

/// Claims minted into a first-party access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub email: Option<String>,
    /// The grant flow that created the session, recorded for audit.
    pub grant_method: String,
}

/// The token pair returned to the caller on a successful exchange.
///
/// Exists only if the enclosing transaction committed; the refresh token in
/// here always has a persisted record backing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenPair {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub user: User,
}

/// Mints refresh/access token pairs bound to a user.
#[derive(Clone)]
pub struct SessionIssuer {
    config: SessionConfig,
}

impl SessionIssuer {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Issues a fresh token pair inside the caller's transaction.
    ///
    /// The refresh token record is staged on the transaction, so the pair
    /// becomes observable only when the caller commits.
    pub async fn issue(
        &self,
        txn: &mut dyn UserTransaction,
        user: &User,
        grant_method: GrantMethod,
    ) -> SessionResult<SessionTokenPair> {
        let refresh_token = generate_refresh_token();

        txn.insert_refresh_token(RefreshTokenRecord {
            id: Uuid::new_v4(),
            token: refresh_token.clone(),
            user_id: user.id,
            grant_method: grant_method.as_str().to_string(),
            revoked: false,
            created_at: Utc::now(),
        })
        .await?;

        let now = Utc::now();
        let expires_at = now + self.config.jwt_ttl;
        let claims = AccessTokenClaims {
            sub: user.id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            email: user.email.clone(),
            grant_method: grant_method.as_str().to_string(),
        };

        let access_token = encode(
            &Header::new(self.config.algorithm),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )?;

        debug!(user_id = %user.id, grant_method = grant_method.as_str(), "Issued session token pair");

        Ok(SessionTokenPair {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: self.config.jwt_ttl.num_seconds(),
            refresh_token,
            user: user.clone(),
        })
    }
}

fn generate_refresh_token() -> String {
    let mut rng = thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.r#gen::<u8>()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}
