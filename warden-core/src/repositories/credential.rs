//! Repository trait for the credential store accessor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Error, UserId, storage::CredentialRecord};

/// Reads and writes per-user security attributes.
///
/// The credential store is owned by the persistence collaborator; the core
/// only touches the fields below. Setters return
/// [`StorageError::NotFound`](crate::error::StorageError::NotFound) when the
/// user does not exist.
#[async_trait]
pub trait CredentialRepository: Send + Sync + 'static {
    /// Fetch the credential record for a user.
    async fn find(&self, user_id: &UserId) -> Result<Option<CredentialRecord>, Error>;

    /// Fetch the credential record for an email address.
    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, Error>;

    /// Overwrite the failed-attempt counter.
    async fn set_failed_attempts(&self, user_id: &UserId, count: u32) -> Result<(), Error>;

    /// Set or clear the account lock.
    async fn set_locked_until(
        &self,
        user_id: &UserId,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), Error>;

    /// Store (or clear, with `None`) the MFA secret and the enabled flag together.
    async fn set_mfa_secret(
        &self,
        user_id: &UserId,
        secret: Option<String>,
        enabled: bool,
    ) -> Result<(), Error>;

    /// Record a successful login.
    async fn record_login(&self, user_id: &UserId, at: DateTime<Utc>) -> Result<(), Error>;
}
