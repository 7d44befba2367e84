//! User and external identity storage behind a transactional contract.
//!
//! The grant pipeline only ever touches storage through [`UserStore`] and
//! [`UserTransaction`]; nothing written inside a transaction is visible to
//! other requests until `commit`, and a dropped or rolled-back transaction
//! leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("External identity for ({provider_type}, {subject}) already exists")]
    DuplicateIdentity {
        provider_type: String,
        subject: String,
    },

    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("Storage error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The durable local account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(email: Option<String>, display_name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            display_name,
            created_at: Utc::now(),
            last_sign_in_at: None,
        }
    }
}

/// Binds a `(provider_type, subject)` pair to a local user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_type: String,
    pub subject: String,
    pub identity_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalIdentity {
    pub fn new(
        user_id: Uuid,
        provider_type: String,
        subject: String,
        identity_data: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            provider_type,
            subject,
            identity_data,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A refresh token persisted alongside the session it anchors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    /// The grant flow that created the token, recorded for audit.
    pub grant_method: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

/// Storage entry point; each unit of work runs in its own transaction.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UserTransaction>>;
}

/// Scoped unit of work over users, identities, and refresh tokens.
///
/// Uniqueness of `(provider_type, subject)` is enforced at commit so two
/// concurrent transactions linking the same identity surface
/// [`StoreError::DuplicateIdentity`] to exactly one of them.
#[async_trait]
pub trait UserTransaction: Send {
    async fn find_identity(
        &mut self,
        provider_type: &str,
        subject: &str,
    ) -> StoreResult<Option<ExternalIdentity>>;

    async fn find_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn insert_user(&mut self, user: User) -> StoreResult<()>;

    async fn update_user(&mut self, user: User) -> StoreResult<()>;

    async fn insert_identity(&mut self, identity: ExternalIdentity) -> StoreResult<()>;

    async fn update_identity(&mut self, identity: ExternalIdentity) -> StoreResult<()>;

    async fn insert_refresh_token(&mut self, token: RefreshTokenRecord) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[derive(Default)]
struct StoreState {
    users: HashMap<Uuid, User>,
    identities: HashMap<(String, String), ExternalIdentity>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
}

/// In-memory implementation of [`UserStore`].
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    pub async fn identity_count(&self) -> usize {
        self.state.read().await.identities.len()
    }

    pub async fn refresh_token_count(&self) -> usize {
        self.state.read().await.refresh_tokens.len()
    }

    pub async fn lookup_refresh_token(&self, token: &str) -> Option<RefreshTokenRecord> {
        self.state.read().await.refresh_tokens.get(token).cloned()
    }

    pub async fn lookup_identity(
        &self,
        provider_type: &str,
        subject: &str,
    ) -> Option<ExternalIdentity> {
        self.state
            .read()
            .await
            .identities
            .get(&(provider_type.to_string(), subject.to_string()))
            .cloned()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn begin(&self) -> StoreResult<Box<dyn UserTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            state: self.state.clone(),
            staged_users: Vec::new(),
            updated_users: Vec::new(),
            staged_identities: Vec::new(),
            updated_identities: Vec::new(),
            staged_refresh_tokens: Vec::new(),
        }))
    }
}

/// Buffers writes until commit; reads see the staged writes of this
/// transaction layered over committed state.
struct InMemoryTransaction {
    state: Arc<RwLock<StoreState>>,
    staged_users: Vec<User>,
    updated_users: Vec<User>,
    staged_identities: Vec<ExternalIdentity>,
    updated_identities: Vec<ExternalIdentity>,
    staged_refresh_tokens: Vec<RefreshTokenRecord>,
}

#[async_trait]
impl UserTransaction for InMemoryTransaction {
    async fn find_identity(
        &mut self,
        provider_type: &str,
        subject: &str,
    ) -> StoreResult<Option<ExternalIdentity>> {
        if let Some(identity) = self
            .staged_identities
            .iter()
            .find(|identity| identity.provider_type == provider_type && identity.subject == subject)
        {
            return Ok(Some(identity.clone()));
        }

        let state = self.state.read().await;
        Ok(state
            .identities
            .get(&(provider_type.to_string(), subject.to_string()))
            .cloned())
    }

    async fn find_user(&mut self, user_id: Uuid) -> StoreResult<Option<User>> {
        if let Some(user) = self.staged_users.iter().find(|user| user.id == user_id) {
            return Ok(Some(user.clone()));
        }

        let state = self.state.read().await;
        Ok(state.users.get(&user_id).cloned())
    }

    async fn insert_user(&mut self, user: User) -> StoreResult<()> {
        self.staged_users.push(user);
        Ok(())
    }

    async fn update_user(&mut self, user: User) -> StoreResult<()> {
        let state = self.state.read().await;
        if !state.users.contains_key(&user.id)
            && !self.staged_users.iter().any(|staged| staged.id == user.id)
        {
            return Err(StoreError::UserNotFound(user.id));
        }
        drop(state);

        self.updated_users.push(user);
        Ok(())
    }

    async fn insert_identity(&mut self, identity: ExternalIdentity) -> StoreResult<()> {
        let key = (identity.provider_type.clone(), identity.subject.clone());
        let state = self.state.read().await;
        if state.identities.contains_key(&key) {
            return Err(StoreError::DuplicateIdentity {
                provider_type: identity.provider_type,
                subject: identity.subject,
            });
        }
        drop(state);

        self.staged_identities.push(identity);
        Ok(())
    }

    async fn update_identity(&mut self, identity: ExternalIdentity) -> StoreResult<()> {
        self.updated_identities.push(identity);
        Ok(())
    }

    async fn insert_refresh_token(&mut self, token: RefreshTokenRecord) -> StoreResult<()> {
        self.staged_refresh_tokens.push(token);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut state = self.state.write().await;

        // Re-check identity uniqueness under the write lock; a concurrent
        // transaction may have committed the same pair since staging.
        for identity in &self.staged_identities {
            let key = (identity.provider_type.clone(), identity.subject.clone());
            if state.identities.contains_key(&key) {
                return Err(StoreError::DuplicateIdentity {
                    provider_type: identity.provider_type.clone(),
                    subject: identity.subject.clone(),
                });
            }
        }

        for user in self.staged_users {
            state.users.insert(user.id, user);
        }
        for user in self.updated_users {
            state.users.insert(user.id, user);
        }
        for identity in self.staged_identities {
            let key = (identity.provider_type.clone(), identity.subject.clone());
            state.identities.insert(key, identity);
        }
        for identity in self.updated_identities {
            let key = (identity.provider_type.clone(), identity.subject.clone());
            state.identities.insert(key, identity);
        }
        for token in self.staged_refresh_tokens {
            state.refresh_tokens.insert(token.token.clone(), token);
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        // Staged writes are simply dropped.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_for(user: &User) -> ExternalIdentity {
        ExternalIdentity::new(
            user.id,
            "google".to_string(),
            "subject-1".to_string(),
            serde_json::json!({"sub": "subject-1"}),
        )
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let store = InMemoryUserStore::new();

        let mut txn = store.begin().await.unwrap();
        let user = User::new(Some("user@example.com".to_string()), None);
        txn.insert_user(user.clone()).await.unwrap();
        txn.insert_identity(identity_for(&user)).await.unwrap();

        assert_eq!(store.user_count().await, 0);
        assert_eq!(store.identity_count().await, 0);

        txn.commit().await.unwrap();

        assert_eq!(store.user_count().await, 1);
        assert_eq!(store.identity_count().await, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = InMemoryUserStore::new();

        let mut txn = store.begin().await.unwrap();
        let user = User::new(None, None);
        txn.insert_user(user.clone()).await.unwrap();
        txn.insert_identity(identity_for(&user)).await.unwrap();
        txn.rollback().await.unwrap();

        assert_eq!(store.user_count().await, 0);
        assert_eq!(store.identity_count().await, 0);
    }

    #[tokio::test]
    async fn test_reads_see_own_staged_writes() {
        let store = InMemoryUserStore::new();

        let mut txn = store.begin().await.unwrap();
        let user = User::new(None, None);
        txn.insert_user(user.clone()).await.unwrap();
        txn.insert_identity(identity_for(&user)).await.unwrap();

        let found = txn
            .find_identity("google", "subject-1")
            .await
            .unwrap()
            .expect("staged identity visible inside the transaction");
        assert_eq!(found.user_id, user.id);

        let found_user = txn.find_user(user.id).await.unwrap();
        assert!(found_user.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_link_race_surfaces_duplicate_at_commit() {
        let store = InMemoryUserStore::new();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        let user_a = User::new(None, None);
        first.insert_user(user_a.clone()).await.unwrap();
        first.insert_identity(identity_for(&user_a)).await.unwrap();

        let user_b = User::new(None, None);
        second.insert_user(user_b.clone()).await.unwrap();
        second.insert_identity(identity_for(&user_b)).await.unwrap();

        first.commit().await.unwrap();

        let result = second.commit().await;
        assert!(matches!(
            result,
            Err(StoreError::DuplicateIdentity { .. })
        ));

        // Only the winner's rows are visible.
        assert_eq!(store.user_count().await, 1);
        let linked = store.lookup_identity("google", "subject-1").await.unwrap();
        assert_eq!(linked.user_id, user_a.id);
    }

    #[tokio::test]
    async fn test_update_user_requires_existing_row() {
        let store = InMemoryUserStore::new();

        let mut txn = store.begin().await.unwrap();
        let ghost = User::new(None, None);
        let result = txn.update_user(ghost).await;
        assert!(matches!(result, Err(StoreError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_refresh_token_persists_with_grant_method() {
        let store = InMemoryUserStore::new();

        let user = User::new(None, None);
        let mut txn = store.begin().await.unwrap();
        txn.insert_user(user.clone()).await.unwrap();
        txn.insert_refresh_token(RefreshTokenRecord {
            id: Uuid::new_v4(),
            token: "opaque-token".to_string(),
            user_id: user.id,
            grant_method: "id_token".to_string(),
            revoked: false,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        txn.commit().await.unwrap();

        let record = store.lookup_refresh_token("opaque-token").await.unwrap();
        assert_eq!(record.user_id, user.id);
        assert_eq!(record.grant_method, "id_token");
        assert!(!record.revoked);
    }
}
