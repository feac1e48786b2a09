//! Records exchanged with the persistence collaborator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Per-user security attributes held by the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub user_id: UserId,
    pub email: String,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// Stored TOTP secret. Encrypted at rest when field encryption is enabled.
    #[serde(skip_serializing)]
    pub mfa_secret: Option<String>,
    pub mfa_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            failed_attempts: 0,
            locked_until: None,
            mfa_secret: None,
            mfa_enabled: false,
            last_login_at: None,
        }
    }

    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    pub fn has_mfa_secret(&self) -> bool {
        self.mfa_secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// One entry in the append-only login attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttemptRecord {
    /// Email or IP address the attempt was made for
    pub identity: String,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
    pub fail_reason: Option<String>,
}

/// An identity on the temporary blocklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedIdentity {
    pub identity: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    pub blocked_until: DateTime<Utc>,
    /// How many times this identity has been blocked
    pub attempt_count: u32,
}

impl BlockedIdentity {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until > now
    }

    /// Seconds until the block lifts, or `None` if it already has.
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.is_active_at(now) {
            Some((self.blocked_until - now).num_seconds().max(1))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_blocked_identity_expiry() {
        let now = Utc::now();
        let block = BlockedIdentity {
            identity: "10.0.0.1".to_string(),
            reason: "brute force".to_string(),
            blocked_at: now,
            blocked_until: now + Duration::minutes(30),
            attempt_count: 1,
        };

        assert!(block.is_active_at(now));
        assert_eq!(block.retry_after_seconds(now), Some(1800));
        assert!(!block.is_active_at(now + Duration::minutes(30)));
        assert_eq!(block.retry_after_seconds(now + Duration::minutes(31)), None);
    }

    #[test]
    fn test_credential_record_defaults() {
        let record = CredentialRecord::new(UserId::new("usr_1"), "a@b.com");
        assert!(!record.has_mfa_secret());
        assert!(!record.mfa_enabled);
        assert!(!record.is_locked_at(Utc::now()));
    }

    #[test]
    fn test_empty_secret_is_not_a_secret() {
        let mut record = CredentialRecord::new(UserId::new("usr_1"), "a@b.com");
        record.mfa_secret = Some(String::new());
        assert!(!record.has_mfa_secret());
    }
}
