//! The identity token grant pipeline.
//!
//! Resolution strictly precedes verification, which strictly precedes the
//! transactional link-and-issue step; a session token pair is observable only
//! after the transaction committed.

use crate::error::{GrantError, GrantResult};
use crate::linker::{LinkOutcome, LinkPolicy, link_or_create};
use rts_identity_core::{GrantMethod, VerifiedIdentity};
use rts_identity_oidc::{
    ExternalProviders, IdTokenVerifier, KeyDiscovery, ProviderHint, resolve_provider,
};
use rts_identity_session::{SessionConfig, SessionIssuer, SessionTokenPair};
use rts_identity_store::{StoreError, UserStore};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// Parameters of the id_token grant request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenGrantParams {
    #[serde(default)]
    pub id_token: String,
    pub access_token: Option<String>,
    pub nonce: Option<String>,
    pub provider: Option<String>,
    pub client_id: Option<String>,
    pub issuer: Option<String>,
}

/// Result of a grant exchange.
///
/// `Suppressed` is the intentional no-op: the transaction was aborted without
/// anything having gone wrong, and the caller gets a benign empty response.
#[derive(Debug)]
pub enum GrantOutcome {
    Issued(SessionTokenPair),
    Suppressed,
}

/// Exchanges verified external identity tokens for first-party sessions.
pub struct GrantService {
    providers: ExternalProviders,
    verifier: IdTokenVerifier,
    store: Arc<dyn UserStore>,
    issuer: SessionIssuer,
    policy: LinkPolicy,
}

impl GrantService {
    pub fn new(
        providers: ExternalProviders,
        discovery: Arc<dyn KeyDiscovery>,
        store: Arc<dyn UserStore>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            providers,
            verifier: IdTokenVerifier::new(discovery),
            store,
            issuer: SessionIssuer::new(session_config),
            policy: LinkPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LinkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs the full pipeline for one grant request.
    pub async fn exchange(&self, params: &IdTokenGrantParams) -> GrantResult<GrantOutcome> {
        if params.id_token.is_empty() {
            return Err(GrantError::InvalidRequest("id_token required".to_string()));
        }

        let provider = non_empty(params.provider.as_deref());
        let client_id = non_empty(params.client_id.as_deref());
        let issuer = non_empty(params.issuer.as_deref());

        if provider.is_none() && (client_id.is_none() || issuer.is_none()) {
            return Err(GrantError::InvalidRequest(
                "provider or client_id and issuer required".to_string(),
            ));
        }

        let resolved = resolve_provider(
            &self.providers,
            &ProviderHint {
                provider,
                client_id,
                issuer,
            },
        )?;

        let identity = self
            .verifier
            .verify(
                &resolved,
                &params.id_token,
                non_empty(params.access_token.as_deref()),
                non_empty(params.nonce.as_deref()),
            )
            .await?;

        match self.link_and_issue(&identity).await {
            // Two concurrent requests linked the same identity; ours lost the
            // race, so rerun against the now-existing identity.
            Err(GrantError::Store(StoreError::DuplicateIdentity { .. })) => {
                self.link_and_issue(&identity).await
            }
            outcome => outcome,
        }
    }

    /// One atomic unit of work: link the account, issue the session, commit.
    async fn link_and_issue(&self, identity: &VerifiedIdentity) -> GrantResult<GrantOutcome> {
        let mut txn = self.store.begin().await?;

        let user = match link_or_create(txn.as_mut(), identity, &self.policy).await {
            Ok(LinkOutcome::Linked(user)) => user,
            Ok(LinkOutcome::SignupsDisabled) => {
                txn.rollback().await?;
                return Ok(GrantOutcome::Suppressed);
            }
            Err(error) => {
                rollback_quietly(txn).await;
                return Err(error);
            }
        };

        let pair = match self
            .issuer
            .issue(txn.as_mut(), &user, GrantMethod::IdToken)
            .await
        {
            Ok(pair) => pair,
            Err(error) => {
                rollback_quietly(txn).await;
                return Err(error.into());
            }
        };

        txn.commit().await?;

        Ok(GrantOutcome::Issued(pair))
    }
}

async fn rollback_quietly(txn: Box<dyn rts_identity_store::UserTransaction>) {
    if let Err(error) = txn.rollback().await {
        warn!(error = %error, "Rollback after failed grant transaction also failed");
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}
