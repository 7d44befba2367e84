//! Linking a verified external identity to a local account.

use crate::error::GrantResult;
use chrono::Utc;
use rts_identity_core::VerifiedIdentity;
use rts_identity_store::{ExternalIdentity, StoreError, User, UserTransaction};
use tracing::info;

/// Account creation policy applied when no linked account exists yet.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    pub allow_signups: bool,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            allow_signups: true,
        }
    }
}

/// Result of the linking step.
///
/// `SignupsDisabled` is an intentional no-op, not a failure: the caller must
/// abort the transaction and answer with a benign empty response.
#[derive(Debug)]
pub enum LinkOutcome {
    Linked(User),
    SignupsDisabled,
}

/// Finds the account linked to `(provider_type, subject)` or creates one.
///
/// Runs inside the caller's transaction; an existing identity resolves to its
/// existing user and has its profile data refreshed, never duplicated.
pub async fn link_or_create(
    txn: &mut dyn UserTransaction,
    identity: &VerifiedIdentity,
    policy: &LinkPolicy,
) -> GrantResult<LinkOutcome> {
    if let Some(existing) = txn
        .find_identity(&identity.provider_type, &identity.subject)
        .await?
    {
        let mut user = txn
            .find_user(existing.user_id)
            .await?
            .ok_or(StoreError::UserNotFound(existing.user_id))?;

        user.last_sign_in_at = Some(Utc::now());
        txn.update_user(user.clone()).await?;

        let mut refreshed = existing;
        refreshed.identity_data = identity.identity_data();
        refreshed.updated_at = Utc::now();
        txn.update_identity(refreshed).await?;

        return Ok(LinkOutcome::Linked(user));
    }

    if !policy.allow_signups {
        info!(
            provider_type = identity.provider_type,
            "Signups are disabled, suppressing account creation"
        );
        return Ok(LinkOutcome::SignupsDisabled);
    }

    let mut user = User::new(identity.email.clone(), identity.display_name.clone());
    user.last_sign_in_at = Some(Utc::now());
    txn.insert_user(user.clone()).await?;

    txn.insert_identity(ExternalIdentity::new(
        user.id,
        identity.provider_type.clone(),
        identity.subject.clone(),
        identity.identity_data(),
    ))
    .await?;

    info!(
        provider_type = identity.provider_type,
        user_id = %user.id,
        "Created account from external identity"
    );

    Ok(LinkOutcome::Linked(user))
}
