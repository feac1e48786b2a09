//! Brute force guard with a temporary identity blocklist.
//!
//! This module implements the login-path half of request gating: failed login
//! attempts are appended to a log, counted over a sliding window, and an
//! identity whose failures cross the threshold is put on the blocklist until
//! an absolute expiry.
//!
//! # Features
//!
//! - Append-only failed attempt log, per email and per source IP
//! - Blocklist with absolute expiry; expired blocks are ignored without deletion
//! - Blocked identities are rejected before any other check runs
//! - Explicit lookup policy: storage errors fail open, matches fail closed
//! - Maintenance operations for the scheduler (purge expired blocks, prune attempts)
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_core::services::{BruteForceConfig, BruteForceGuard};
//!
//! let guard = BruteForceGuard::new(repository, BruteForceConfig::default(), events, clock);
//!
//! // Reject early if the caller is blocked or has too many failures
//! guard.guard_login("user@example.com", Some("192.168.1.1")).await?;
//!
//! // Record the outcome once the password has been checked
//! guard.record_login_failure("user@example.com", Some("192.168.1.1"), Some("bad password")).await?;
//! ```

use std::sync::Arc;

use chrono::Duration;

use crate::{
    Error,
    clock::SharedClock,
    error::RateLimitError,
    events::{EventBus, SecurityEvent},
    identity::normalize_identity,
    policy::{LookupPolicy, TrustPolicy},
    repositories::BruteForceRepository,
    storage::{BlockedIdentity, LoginAttemptRecord},
};

/// Configuration for brute force detection.
#[derive(Debug, Clone)]
pub struct BruteForceConfig {
    /// Failed attempts for one email inside `window` that trigger a block
    pub max_attempts: u32,
    /// Failed attempts from one IP inside `window`, across every email
    /// tried, that block the IP
    pub ip_max_attempts: u32,
    /// Window over which failures are counted
    pub window: Duration,
    /// How long a triggered block lasts
    pub block_duration: Duration,
    /// Applied when the blocklist cannot be read
    pub lookup_policy: LookupPolicy,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            ip_max_attempts: 20,
            window: Duration::minutes(15),
            block_duration: Duration::minutes(30),
            lookup_policy: LookupPolicy::fail_open(),
        }
    }
}

/// Result of counting recent failures for an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BruteForceCheck {
    pub is_brute_force: bool,
    pub count: u32,
}

/// Service for failed-login tracking and identity blocking.
///
/// # Thread Safety
///
/// This service is thread-safe and can be shared across multiple tasks.
/// The underlying repository handles concurrent access appropriately.
pub struct BruteForceGuard<R: BruteForceRepository> {
    repository: Arc<R>,
    config: BruteForceConfig,
    trust: TrustPolicy,
    events: EventBus,
    clock: SharedClock,
}

impl<R: BruteForceRepository> BruteForceGuard<R> {
    pub fn new(
        repository: Arc<R>,
        config: BruteForceConfig,
        events: EventBus,
        clock: SharedClock,
    ) -> Self {
        Self {
            repository,
            config,
            trust: TrustPolicy::none(),
            events,
            clock,
        }
    }

    /// Set the trust policy deciding which sources skip blocking.
    pub fn with_trust_policy(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    /// Get the current configuration.
    pub fn config(&self) -> &BruteForceConfig {
        &self.config
    }

    /// Check whether an identity is currently blocked.
    ///
    /// A block whose `blocked_until` is in the future yields `true` and a
    /// [`SecurityEvent::BlockedRequest`]. An expired block yields `false`
    /// without being deleted. If the blocklist cannot be read the configured
    /// [`LookupPolicy`] decides.
    pub async fn is_blocked(&self, identity: &str) -> bool {
        self.active_block(identity).await.is_some()
    }

    async fn active_block(&self, identity: &str) -> Option<BlockedIdentity> {
        if self.trust.is_trusted(identity) {
            return None;
        }

        let key = normalize_identity(identity);
        let now = self.clock.now();

        let found = match self.repository.find_block(&key).await {
            Ok(found) => found,
            Err(e) => {
                let blocked = self.config.lookup_policy.resolve("blocklist", Err(e));
                return blocked.then(|| BlockedIdentity {
                    identity: key,
                    reason: "blocklist unavailable".to_string(),
                    blocked_at: now,
                    blocked_until: now + Duration::minutes(1),
                    attempt_count: 0,
                });
            }
        };

        let block = found.filter(|block| block.is_active_at(now))?;

        tracing::warn!(
            identity = %key,
            blocked_until = %block.blocked_until,
            "Rejected request from blocked identity"
        );
        self.events
            .publish(SecurityEvent::BlockedRequest {
                identity: key,
                blocked_until: block.blocked_until,
                timestamp: now,
            })
            .await;

        Some(block)
    }

    /// Reject with [`RateLimitError::Blocked`] if the identity is blocked.
    pub async fn ensure_not_blocked(&self, identity: &str) -> Result<(), Error> {
        match self.active_block(identity).await {
            Some(block) => Err(RateLimitError::Blocked {
                retry_after_seconds: block.retry_after_seconds(self.clock.now()).unwrap_or(1),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Count failed attempts for `identity` within `window`.
    ///
    /// `is_brute_force` is set once the count reaches `max_attempts`.
    pub async fn check_brute_force(
        &self,
        identity: &str,
        max_attempts: u32,
        window: Duration,
    ) -> Result<BruteForceCheck, Error> {
        let key = normalize_identity(identity);
        let since = self.clock.now() - window;
        let count = self.repository.count_failures_since(&key, since).await?;

        Ok(BruteForceCheck {
            is_brute_force: count >= max_attempts,
            count,
        })
    }

    /// Put an identity on the blocklist for `duration`.
    pub async fn block_ip(
        &self,
        identity: &str,
        reason: &str,
        duration: Duration,
    ) -> Result<BlockedIdentity, Error> {
        let key = normalize_identity(identity);
        let now = self.clock.now();
        let block = self
            .repository
            .upsert_block(&key, reason, now, now + duration)
            .await?;

        tracing::warn!(
            identity = %key,
            reason = reason,
            blocked_until = %block.blocked_until,
            times_blocked = block.attempt_count,
            "Blocked identity"
        );
        self.events
            .publish(SecurityEvent::IdentityBlocked {
                identity: key,
                reason: reason.to_string(),
                blocked_until: block.blocked_until,
                timestamp: now,
            })
            .await;

        Ok(block)
    }

    /// Remove an identity from the blocklist (operator action).
    ///
    /// Returns `true` if a block existed.
    pub async fn unblock(&self, identity: &str) -> Result<bool, Error> {
        let key = normalize_identity(identity);
        let removed = self.repository.remove_block(&key).await?;
        self.repository.reset_failures(&key).await?;

        if removed {
            tracing::info!(identity = %key, "Unblocked identity");
            self.events
                .publish(SecurityEvent::IdentityUnblocked {
                    identity: key,
                    timestamp: self.clock.now(),
                })
                .await;
        }

        Ok(removed)
    }

    /// Append a login attempt for `identity`.
    pub async fn record_attempt(
        &self,
        identity: &str,
        success: bool,
        fail_reason: Option<&str>,
    ) -> Result<(), Error> {
        let key = normalize_identity(identity);
        let now = self.clock.now();

        self.repository
            .record_attempt(LoginAttemptRecord {
                identity: key.clone(),
                success,
                attempted_at: now,
                fail_reason: fail_reason.map(str::to_string),
            })
            .await?;

        if !success {
            let failed_attempts = self
                .repository
                .count_failures_since(&key, now - self.config.window)
                .await?;
            self.events
                .publish(SecurityEvent::LoginFailed {
                    identity: key,
                    failed_attempts,
                    reason: fail_reason.map(str::to_string),
                    timestamp: now,
                })
                .await;
        }

        Ok(())
    }

    /// Record a failed login for `email`, and for the source IP when known.
    ///
    /// Both entries land in the attempt log so that one IP trying many emails
    /// is counted as well. A single [`SecurityEvent::LoginFailed`] is
    /// published, for the email. Trusted sources are not logged by IP.
    pub async fn record_login_failure(
        &self,
        email: &str,
        ip_address: Option<&str>,
        fail_reason: Option<&str>,
    ) -> Result<(), Error> {
        if let Some(ip) = ip_address.filter(|ip| !self.trust.is_trusted(ip)) {
            self.repository
                .record_attempt(LoginAttemptRecord {
                    identity: normalize_identity(ip),
                    success: false,
                    attempted_at: self.clock.now(),
                    fail_reason: fail_reason.map(str::to_string),
                })
                .await?;
        }
        self.record_attempt(email, false, fail_reason).await
    }

    /// Stop counting the failures recorded so far for an identity.
    ///
    /// Called after a successful login. The attempt log keeps its entries.
    pub async fn reset_failures(&self, identity: &str) -> Result<(), Error> {
        self.repository
            .reset_failures(&normalize_identity(identity))
            .await
    }

    /// Gate a login attempt.
    ///
    /// The IP and the email are checked against the blocklist first; a block
    /// short-circuits before any other check. Then the failures recorded for
    /// the email are counted, and crossing `max_attempts` blocks the email.
    /// Failures recorded for the IP are counted against `ip_max_attempts`
    /// and block the IP. Both blocks last the configured duration.
    pub async fn guard_login(&self, email: &str, ip_address: Option<&str>) -> Result<(), Error> {
        if let Some(ip) = ip_address {
            self.ensure_not_blocked(ip).await?;
        }
        self.ensure_not_blocked(email).await?;

        self.escalate(email, self.config.max_attempts).await?;
        if let Some(ip) = ip_address.filter(|ip| !self.trust.is_trusted(ip)) {
            self.escalate(ip, self.config.ip_max_attempts).await?;
        }

        Ok(())
    }

    /// Block `identity` once its recent failures reach `max_attempts`.
    ///
    /// A failure count that cannot be read is settled by the lookup policy.
    async fn escalate(&self, identity: &str, max_attempts: u32) -> Result<(), Error> {
        let check = match self
            .check_brute_force(identity, max_attempts, self.config.window)
            .await
        {
            Ok(check) => check,
            Err(e) => {
                if self
                    .config
                    .lookup_policy
                    .resolve("failure count", Err::<bool, _>(e))
                {
                    return Err(RateLimitError::Blocked {
                        retry_after_seconds: 60,
                    }
                    .into());
                }
                return Ok(());
            }
        };

        if !check.is_brute_force {
            return Ok(());
        }

        let key = normalize_identity(identity);
        tracing::warn!(
            identity = %key,
            failed_attempts = check.count,
            "Brute force attempt detected"
        );
        self.events
            .publish(SecurityEvent::BruteForceDetected {
                identity: key,
                failed_attempts: check.count,
                timestamp: self.clock.now(),
            })
            .await;

        let block = self
            .block_ip(
                identity,
                &format!("{} failed login attempts", check.count),
                self.config.block_duration,
            )
            .await?;

        Err(RateLimitError::Blocked {
            retry_after_seconds: block
                .retry_after_seconds(self.clock.now())
                .unwrap_or(1),
        }
        .into())
    }

    /// List blocks that are still in force.
    pub async fn list_blocked(&self) -> Result<Vec<BlockedIdentity>, Error> {
        let now = self.clock.now();
        let mut blocks: Vec<_> = self
            .repository
            .list_blocks()
            .await?
            .into_iter()
            .filter(|b| b.is_active_at(now))
            .collect();
        blocks.sort_by(|a, b| a.blocked_until.cmp(&b.blocked_until));
        Ok(blocks)
    }

    /// Delete blocks that expired more than `retention` ago.
    pub async fn purge_expired(&self, retention: Duration) -> Result<u64, Error> {
        let removed = self
            .repository
            .purge_blocks(self.clock.now() - retention)
            .await?;
        if removed > 0 {
            tracing::info!(count = removed, "Purged expired identity blocks");
        }
        Ok(removed)
    }

    /// Delete login attempts older than `retention`.
    pub async fn prune_attempts(&self, retention: Duration) -> Result<u64, Error> {
        let removed = self
            .repository
            .prune_attempts(self.clock.now() - retention)
            .await?;
        if removed > 0 {
            tracing::info!(count = removed, "Pruned old login attempt records");
        }
        Ok(removed)
    }
}
