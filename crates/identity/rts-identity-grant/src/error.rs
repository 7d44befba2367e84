//! Grant pipeline error types.

use rts_identity_oidc::OidcError;
use rts_identity_session::SessionError;
use rts_identity_store::StoreError;
use thiserror::Error;

pub type GrantResult<T> = Result<T, GrantError>;

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Oidc(#[from] OidcError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl GrantError {
    /// Whether the failure is internal (storage, issuance, discovery) rather
    /// than a rejection of the request itself.
    pub fn is_internal(&self) -> bool {
        match self {
            GrantError::InvalidRequest(_) => false,
            GrantError::Oidc(oidc) => oidc.is_internal(),
            GrantError::Store(_) | GrantError::Session(_) => true,
        }
    }
}
