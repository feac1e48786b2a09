use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    Error, UserId,
    repositories::{BruteForceRepository, CredentialRepository, RepositoryProvider},
    storage::{BlockedIdentity, CredentialRecord, LoginAttemptRecord},
};

/// Adapter that wraps a RepositoryProvider and implements individual repository traits
pub struct CredentialRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> CredentialRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> CredentialRepository for CredentialRepositoryAdapter<R> {
    async fn find(&self, user_id: &UserId) -> Result<Option<CredentialRecord>, Error> {
        self.provider.credentials().find(user_id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, Error> {
        self.provider.credentials().find_by_email(email).await
    }

    async fn set_failed_attempts(&self, user_id: &UserId, count: u32) -> Result<(), Error> {
        self.provider
            .credentials()
            .set_failed_attempts(user_id, count)
            .await
    }

    async fn set_locked_until(
        &self,
        user_id: &UserId,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        self.provider
            .credentials()
            .set_locked_until(user_id, locked_until)
            .await
    }

    async fn set_mfa_secret(
        &self,
        user_id: &UserId,
        secret: Option<String>,
        enabled: bool,
    ) -> Result<(), Error> {
        self.provider
            .credentials()
            .set_mfa_secret(user_id, secret, enabled)
            .await
    }

    async fn record_login(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<(), Error> {
        self.provider.credentials().record_login(user_id, at).await
    }
}

pub struct BruteForceRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> BruteForceRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> BruteForceRepository for BruteForceRepositoryAdapter<R> {
    async fn record_attempt(&self, attempt: LoginAttemptRecord) -> Result<(), Error> {
        self.provider.brute_force().record_attempt(attempt).await
    }

    async fn count_failures_since(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, Error> {
        self.provider
            .brute_force()
            .count_failures_since(identity, since)
            .await
    }

    async fn reset_failures(&self, identity: &str) -> Result<(), Error> {
        self.provider.brute_force().reset_failures(identity).await
    }

    async fn prune_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.brute_force().prune_attempts(before).await
    }

    async fn upsert_block(
        &self,
        identity: &str,
        reason: &str,
        blocked_at: DateTime<Utc>,
        blocked_until: DateTime<Utc>,
    ) -> Result<BlockedIdentity, Error> {
        self.provider
            .brute_force()
            .upsert_block(identity, reason, blocked_at, blocked_until)
            .await
    }

    async fn find_block(&self, identity: &str) -> Result<Option<BlockedIdentity>, Error> {
        self.provider.brute_force().find_block(identity).await
    }

    async fn remove_block(&self, identity: &str) -> Result<bool, Error> {
        self.provider.brute_force().remove_block(identity).await
    }

    async fn list_blocks(&self) -> Result<Vec<BlockedIdentity>, Error> {
        self.provider.brute_force().list_blocks().await
    }

    async fn purge_blocks(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.brute_force().purge_blocks(before).await
    }
}
