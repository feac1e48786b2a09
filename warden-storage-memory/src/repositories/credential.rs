//! In-memory implementation of the credential repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use warden_core::{
    CredentialRecord, Error, UserId, error::StorageError, identity::normalize_identity,
    repositories::CredentialRepository,
};

/// Credential records keyed by user id.
#[derive(Default)]
pub struct MemoryCredentialRepository {
    records: RwLock<HashMap<UserId, CredentialRecord>>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record. The credential store owns user creation,
    /// so this is how applications and tests seed it.
    pub async fn insert(&self, record: CredentialRecord) {
        self.records
            .write()
            .await
            .insert(record.user_id.clone(), record);
    }

    pub async fn remove(&self, user_id: &UserId) -> Option<CredentialRecord> {
        self.records.write().await.remove(user_id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn update<F>(&self, user_id: &UserId, apply: F) -> Result<(), Error>
    where
        F: FnOnce(&mut CredentialRecord) + Send,
    {
        let mut records = self.records.write().await;
        let record = records.get_mut(user_id).ok_or(StorageError::NotFound)?;
        apply(record);
        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<CredentialRecord>, Error> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, Error> {
        let email = normalize_identity(email);
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| normalize_identity(&r.email) == email)
            .cloned())
    }

    async fn set_failed_attempts(&self, user_id: &UserId, count: u32) -> Result<(), Error> {
        self.update(user_id, |r| r.failed_attempts = count).await
    }

    async fn set_locked_until(
        &self,
        user_id: &UserId,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), Error> {
        self.update(user_id, |r| r.locked_until = locked_until).await
    }

    async fn set_mfa_secret(
        &self,
        user_id: &UserId,
        secret: Option<String>,
        enabled: bool,
    ) -> Result<(), Error> {
        self.update(user_id, |r| {
            r.mfa_secret = secret;
            r.mfa_enabled = enabled;
        })
        .await
    }

    async fn record_login(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<(), Error> {
        self.update(user_id, |r| {
            r.last_login_at = Some(at);
            r.failed_attempts = 0;
            r.locked_until = None;
        })
        .await
    }
}
