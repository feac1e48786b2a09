//! Repository trait for brute force protection.
//!
//! This module defines the repository interface for the login attempt log
//! and the temporary identity blocklist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{BlockedIdentity, LoginAttemptRecord},
};

/// Repository for brute force protection data.
///
/// Login attempts are an append-only log; the failure count for an identity
/// is derived by counting recent failed entries. Blocks carry an absolute
/// expiry and are treated as inactive once it passes, whether or not the row
/// has been purged yet.
///
/// # Security Considerations
///
/// - Attempts should be recorded for all identities, including unknown emails,
///   to prevent user enumeration.
/// - IP addresses stored for auditing may be subject to data retention regulations.
#[async_trait]
pub trait BruteForceRepository: Send + Sync + 'static {
    /// Append a login attempt to the log.
    async fn record_attempt(&self, attempt: LoginAttemptRecord) -> Result<(), Error>;

    /// Count failed attempts for an identity at or after `since`, ignoring
    /// those recorded before the identity's last reset.
    async fn count_failures_since(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, Error>;

    /// Stop counting the failures recorded so far for an identity.
    ///
    /// Only failures appended after this call are seen by
    /// [`count_failures_since`](Self::count_failures_since). The log itself is
    /// left intact; entries leave it through
    /// [`prune_attempts`](Self::prune_attempts) only.
    async fn reset_failures(&self, identity: &str) -> Result<(), Error>;

    /// Delete attempts older than `before`. Returns the number removed.
    async fn prune_attempts(&self, before: DateTime<Utc>) -> Result<u64, Error>;

    /// Insert or refresh a block.
    ///
    /// When the identity is already present its reason and window are
    /// replaced and `attempt_count` is incremented; otherwise a new entry is
    /// created with `attempt_count = 1`.
    async fn upsert_block(
        &self,
        identity: &str,
        reason: &str,
        blocked_at: DateTime<Utc>,
        blocked_until: DateTime<Utc>,
    ) -> Result<BlockedIdentity, Error>;

    /// Fetch the block for an identity, active or not.
    async fn find_block(&self, identity: &str) -> Result<Option<BlockedIdentity>, Error>;

    /// Remove a block. Returns `true` if one existed.
    async fn remove_block(&self, identity: &str) -> Result<bool, Error>;

    /// List every stored block.
    async fn list_blocks(&self) -> Result<Vec<BlockedIdentity>, Error>;

    /// Delete blocks whose `blocked_until` is before `before`. Returns the number removed.
    async fn purge_blocks(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}
